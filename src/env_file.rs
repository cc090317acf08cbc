//! `.env` support shared by both binaries.
//!
//! Values already present in the process environment are never overwritten.

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    /// Named on the command line rather than found in the working directory.
    pub explicit: bool,
    pub applied: usize,
}

#[derive(Debug)]
pub enum EnvFileError {
    NotFound(PathBuf),
    Io { path: PathBuf, source: io::Error },
    Syntax { path: PathBuf, line: usize, message: String },
}

impl Display for EnvFileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EnvFileError::NotFound(path) => write!(f, "env file not found: {}", path.display()),
            EnvFileError::Io { path, source } => write!(f, "failed to read {}: {}", path.display(), source),
            EnvFileError::Syntax { path, line, message } => write!(f, "{}:{}: {}", path.display(), line, message),
        }
    }
}

impl std::error::Error for EnvFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnvFileError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Apply `explicit` if given (it must exist), else `./.env` when present.
pub fn load(explicit: Option<&Path>) -> Result<Option<LoadedEnvFile>, EnvFileError> {
    let (path, explicit) = match explicit {
        Some(path) if path.is_file() => (path.to_path_buf(), true),
        Some(path) => return Err(EnvFileError::NotFound(path.to_path_buf())),
        None => {
            let cwd = std::env::current_dir().map_err(|source| EnvFileError::Io {
                path: PathBuf::from("."),
                source,
            })?;
            let candidate = cwd.join(".env");
            if !candidate.is_file() {
                return Ok(None);
            }
            (candidate, false)
        }
    };

    let raw = fs::read_to_string(&path).map_err(|source| EnvFileError::Io {
        path: path.clone(),
        source,
    })?;
    let assignments = parse(&raw).map_err(|(line, message)| EnvFileError::Syntax {
        path: path.clone(),
        line,
        message,
    })?;

    let mut applied = 0;
    for (key, value) in assignments {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // set_var is unsafe in edition 2024; this runs before any other thread exists.
        unsafe {
            std::env::set_var(&key, value);
        }
        applied += 1;
    }
    Ok(Some(LoadedEnvFile { path, explicit, applied }))
}

/// Parse file contents into assignments; errors carry a 1-based line number.
pub fn parse(contents: &str) -> Result<Vec<(String, String)>, (usize, String)> {
    let mut out = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if let Some(pair) = parse_line(line).map_err(|message| (index + 1, message))? {
            out.push(pair);
        }
    }
    Ok(out)
}

fn parse_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let Some((key, value)) = line.split_once('=') else {
        return Err("missing '=' in assignment".to_string());
    };
    let key = key.trim();
    if key.is_empty() {
        return Err("variable name cannot be empty".to_string());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("variable name contains whitespace: {}", key));
    }

    let value = value.trim();
    let value = if let Some(rest) = value.strip_prefix('"') {
        unquote(rest, '"')?
    } else if let Some(rest) = value.strip_prefix('\'') {
        unquote(rest, '\'')?
    } else {
        // Unquoted values end at an inline comment.
        value.split('#').next().unwrap_or_default().trim_end().to_string()
    };
    Ok(Some((key.to_string(), value)))
}

/// Read up to the closing `quote`; backslash escapes apply inside double quotes only.
fn unquote(input: &str, quote: char) -> Result<String, String> {
    let escapes = quote == '"';
    let mut value = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if escapes && ch == '\\' {
            let escaped = chars.next().ok_or("unterminated escape sequence")?;
            value.push(match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
        } else if ch == quote {
            let rest = chars.as_str().trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err(format!("unexpected characters after closing {}", quote));
            }
            return Ok(value);
        } else {
            value.push(ch);
        }
    }
    Err(format!("unterminated {}-quoted value", quote))
}
