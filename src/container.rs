//! `.hqs` / `.hqx` container codec
//!
//! ## Layout
//!
//! ```text
//! #!/usr/bin/hq\n##HQS#@@@@@@#<tag 30>#<timestamp 10>#<base64 blob>#
//! #!/usr/bin/hq\n##HQX#<token 6>#<tag 30>#<timestamp 10>#<base64 blob>#
//! ```
//!
//! | Field | Bytes |
//! |---|---|
//! | marker (`HQS` / `HQX`) | 16..19 |
//! | interpreter token | 20..26 |
//! | tag | 27..57 |
//! | timestamp | 58..68 |
//! | blob | 69..len-1 |
//!
//! The offsets are fixed and shared with every container issued so far. The
//! blob is the signature, followed for `.hqx` by the zstd-compressed script.
//! Any deviation is a [`HqError::FatalFormat`].

use crate::error::{HqError, Result};
use crate::identity::{Tag, TAG_LEN};
use crate::utils::synced_write;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Read;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

const SHEBANG: &[u8] = b"#!/usr/bin/hq\n#";
const DELIMITER: u8 = b'#';
const SIGNATURE_TOKEN: &str = "@@@@@@";

const MARKER: Range<usize> = 16..19;
const TOKEN: Range<usize> = 20..26;
const TAG: Range<usize> = 27..57;
const TIMESTAMP: Range<usize> = 58..68;
const BLOB_START: usize = 69;

/// Permissions of `.hqs` files
pub const SIGNATURE_MODE: u32 = 0o640;

/// Permissions of `.hqx` files
pub const EXECUTABLE_MODE: u32 = 0o750;

/// Render a timestamp as the fixed 10-digit container field
pub fn timestamp_field(ts: i64) -> String {
    format!("{:010}", ts)
}

/// Script interpreters an executable container can name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    /// POSIX `sh`
    Posix,
    /// zsh
    Zsh,
    /// fish
    Fish,
    /// bash
    Bash,
    /// Lua
    Lua,
    /// Perl
    Perl,
    /// Python
    Python,
    /// JavaScript
    Js,
    /// Java
    Java,
    /// PowerShell
    Pwsh,
    /// Hack (hhvm)
    Hack,
}

const INTERPRETERS: [Interpreter; 11] = [
    Interpreter::Posix,
    Interpreter::Zsh,
    Interpreter::Fish,
    Interpreter::Bash,
    Interpreter::Lua,
    Interpreter::Perl,
    Interpreter::Python,
    Interpreter::Js,
    Interpreter::Java,
    Interpreter::Pwsh,
    Interpreter::Hack,
];

impl Interpreter {
    /// Six-byte token stored in the container
    pub fn token(self) -> &'static str {
        match self {
            Self::Posix => "POSIX=",
            Self::Zsh => "ZSH===",
            Self::Fish => "FISH==",
            Self::Bash => "BASH==",
            Self::Lua => "LUA===",
            Self::Perl => "PERL==",
            Self::Python => "PYTHON",
            Self::Js => "JS====",
            Self::Java => "JAVA==",
            Self::Pwsh => "PWSH==",
            Self::Hack => "HACK==",
        }
    }

    /// Program that runs scripts of this kind
    pub fn program(self) -> &'static str {
        match self {
            Self::Posix => "sh",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
            Self::Bash => "bash",
            Self::Lua => "lua",
            Self::Perl => "perl",
            Self::Python => "python",
            Self::Js => "js",
            Self::Java => "java",
            Self::Pwsh => "pwsh",
            Self::Hack => "hhvm",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Posix => &["sh"],
            Self::Zsh => &["zsh"],
            Self::Fish => &["fish"],
            Self::Bash => &["bash"],
            Self::Lua => &["lua"],
            Self::Perl => &["perl", "pl"],
            Self::Python => &["py"],
            Self::Js => &["js"],
            Self::Java => &["java"],
            Self::Pwsh => &["ps", "ps1"],
            Self::Hack => &["hack"],
        }
    }

    /// Look up a container token
    pub fn from_token(token: &str) -> Option<Self> {
        INTERPRETERS.into_iter().find(|i| i.token() == token)
    }

    /// Guess from a file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        INTERPRETERS
            .into_iter()
            .find(|i| i.extensions().contains(&ext))
    }

    /// Guess from a `#!` line
    pub fn from_shebang(line: &str) -> Option<Self> {
        let line = line.trim().strip_prefix("#!")?;
        let mut words = line.split_whitespace();
        let mut program = words.next()?.rsplit('/').next()?;
        if program == "env" {
            program = words.next()?;
        }
        let program = if program == "powershell" { "pwsh" } else { program };
        INTERPRETERS.into_iter().find(|i| i.program() == program)
    }

    /// Extension first, then the script's first line
    pub fn detect(path: &Path, script: &[u8]) -> Option<Self> {
        Self::from_extension(path).or_else(|| {
            let first = script.split(|&b| b == b'\n').next()?;
            Self::from_shebang(&String::from_utf8_lossy(first))
        })
    }
}

/// Container flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// `.hqs`, signature only
    Signature,
    /// `.hqx`, signature plus compressed script
    Executable(Interpreter),
}

impl ContainerKind {
    fn marker(self) -> &'static str {
        match self {
            Self::Signature => "HQS",
            Self::Executable(_) => "HQX",
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Signature => SIGNATURE_TOKEN,
            Self::Executable(interpreter) => interpreter.token(),
        }
    }

    /// File mode for this flavour
    pub fn mode(self) -> u32 {
        match self {
            Self::Signature => SIGNATURE_MODE,
            Self::Executable(_) => EXECUTABLE_MODE,
        }
    }
}

/// A parsed or to-be-written container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    kind: ContainerKind,
    tag: Tag,
    timestamp: i64,
    signature: Vec<u8>,
    payload: Vec<u8>,
}

impl Container {
    /// Signature-only container
    pub fn signature(tag: Tag, timestamp: i64, signature: Vec<u8>) -> Self {
        Self {
            kind: ContainerKind::Signature,
            tag,
            timestamp,
            signature,
            payload: Vec::new(),
        }
    }

    /// Executable container carrying a compressed script
    pub fn executable(
        interpreter: Interpreter,
        tag: Tag,
        timestamp: i64,
        signature: Vec<u8>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind: ContainerKind::Executable(interpreter),
            tag,
            timestamp,
            signature,
            payload,
        }
    }

    /// Flavour
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Claimed identity
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Signing time
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Timestamp exactly as it appears in the container
    pub fn timestamp_field(&self) -> String {
        timestamp_field(self.timestamp)
    }

    /// Signature bytes
    pub fn signature_bytes(&self) -> &[u8] {
        &self.signature
    }

    /// Compressed script, empty for `.hqs`
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize to container bytes
    ///
    /// # Errors
    ///
    /// - [`HqError::FatalFormat`] if the timestamp does not fit ten digits
    pub fn encode(&self) -> Result<Vec<u8>> {
        let ts = self.timestamp_field();
        if ts.len() != TIMESTAMP.len() {
            return Err(HqError::fatal_format(format!("timestamp {} out of range", ts)));
        }

        let mut blob = self.signature.clone();
        blob.extend_from_slice(&self.payload);
        let blob = STANDARD.encode(blob);

        let mut out = Vec::with_capacity(BLOB_START + blob.len() + 1);
        out.extend_from_slice(SHEBANG);
        for field in [
            self.kind.marker(),
            self.kind.token(),
            self.tag.as_str(),
            ts.as_str(),
            blob.as_str(),
        ] {
            out.push(DELIMITER);
            out.extend_from_slice(field.as_bytes());
        }
        out.push(DELIMITER);
        Ok(out)
    }

    /// Parse container bytes
    ///
    /// `signature_len` splits the blob of a `.hqx` into signature and script.
    ///
    /// # Errors
    ///
    /// - [`HqError::FatalFormat`] for any structural problem
    pub fn decode(bytes: &[u8], signature_len: usize) -> Result<Self> {
        if bytes.len() < BLOB_START + 1 || !bytes.starts_with(SHEBANG) {
            return Err(HqError::fatal_format("not an hq container"));
        }
        for at in [15, MARKER.end, TOKEN.end, TAG.end, TIMESTAMP.end, bytes.len() - 1] {
            if bytes[at] != DELIMITER {
                return Err(HqError::fatal_format(format!("missing delimiter at byte {}", at)));
            }
        }

        let token = field(bytes, TOKEN)?;
        let kind = match field(bytes, MARKER)? {
            "HQS" => ContainerKind::Signature,
            "HQX" => ContainerKind::Executable(
                Interpreter::from_token(token)
                    .ok_or_else(|| HqError::fatal_format(format!("unknown interpreter {:?}", token)))?,
            ),
            other => return Err(HqError::fatal_format(format!("unknown marker {:?}", other))),
        };

        let tag_text = field(bytes, TAG)?;
        debug_assert_eq!(tag_text.len(), TAG_LEN);
        let tag = Tag::parse(tag_text).map_err(|e| HqError::fatal_format(e.to_string()))?;

        let ts_text = field(bytes, TIMESTAMP)?;
        let timestamp = ts_text
            .parse::<i64>()
            .map_err(|_| HqError::fatal_format(format!("timestamp {:?} corrupted", ts_text)))?;

        let mut blob = STANDARD
            .decode(&bytes[BLOB_START..bytes.len() - 1])
            .map_err(|e| HqError::fatal_format(format!("signature blob: {}", e)))?;

        let payload = match kind {
            ContainerKind::Signature => Vec::new(),
            ContainerKind::Executable(_) => {
                if blob.len() <= signature_len {
                    return Err(HqError::fatal_format("executable container without payload"));
                }
                blob.split_off(signature_len)
            }
        };

        debug!("Decoded {:?} container for {}", kind, tag);
        Ok(Self {
            kind,
            tag,
            timestamp,
            signature: blob,
            payload,
        })
    }

    /// Read and parse a container from any reader, such as stdin
    pub fn read_from<R: Read>(mut reader: R, signature_len: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::decode(&bytes, signature_len)
    }

    /// Read and parse a container file
    pub fn load(path: &Path, signature_len: usize) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| HqError::fatal_io(path, e))?;
        Self::decode(&bytes, signature_len)
    }

    /// Durably write the container with its flavour's permissions
    pub fn write_to(&self, path: &Path) -> Result<()> {
        synced_write(path, &self.encode()?, self.kind.mode())
    }
}

fn field(bytes: &[u8], range: Range<usize>) -> Result<&str> {
    std::str::from_utf8(&bytes[range.clone()])
        .map_err(|_| HqError::fatal_format(format!("field at {:?} is not text", range)))
}
