//! Argument builders for gpg invocations.

use jcrypt_pipe::Invocation;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

/// gpg settings shared by every operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GpgConfig {
    /// Key ids or emails to encrypt to (`-r`).
    pub recipients: Vec<String>,
    /// Signing key (`-u`).
    pub local_user: Option<String>,
    /// Sign while encrypting.
    pub sign: bool,
    /// ASCII-armored output.
    pub armor: bool,
    /// Alternate keyring directory (`--homedir`).
    pub homedir: Option<PathBuf>,
    /// Never prompt on the terminal (`--batch`).
    pub batch: bool,
    /// Extra arguments placed before the operation flags.
    pub extra_args: Vec<String>,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            local_user: None,
            sign: false,
            armor: true,
            homedir: None,
            batch: false,
            extra_args: Vec::new(),
        }
    }
}

fn common_args(config: &GpgConfig) -> Vec<OsString> {
    let mut args = Vec::new();

    if let Some(ref homedir) = config.homedir {
        args.push(OsString::from("--homedir"));
        args.push(OsString::from(homedir));
    }

    if config.batch {
        args.push(OsString::from("--batch"));
    }

    args.extend(config.extra_args.iter().map(OsString::from));
    args
}

fn push_local_user(args: &mut Vec<OsString>, config: &GpgConfig) {
    if let Some(ref user) = config.local_user {
        args.push(OsString::from("-u"));
        args.push(OsString::from(user));
    }
}

/// `--encrypt [--sign] [--armor] [-u user] -r <recipient>...`
#[must_use]
pub fn build_encrypt_args(config: &GpgConfig) -> Invocation {
    let mut args = common_args(config);
    args.push(OsString::from("--encrypt"));

    if config.sign {
        args.push(OsString::from("--sign"));
        push_local_user(&mut args, config);
    }

    if config.armor {
        args.push(OsString::from("--armor"));
    }

    for recipient in &config.recipients {
        args.push(OsString::from("-r"));
        args.push(OsString::from(recipient));
    }

    Invocation::new(args)
}

/// `--decrypt`
#[must_use]
pub fn build_decrypt_args(config: &GpgConfig) -> Invocation {
    let mut args = common_args(config);
    args.push(OsString::from("--decrypt"));
    Invocation::new(args)
}

/// `--sign [--armor] [-u user]`
#[must_use]
pub fn build_sign_args(config: &GpgConfig) -> Invocation {
    let mut args = common_args(config);
    args.push(OsString::from("--sign"));
    if config.armor {
        args.push(OsString::from("--armor"));
    }
    push_local_user(&mut args, config);
    Invocation::new(args)
}

/// `--verify --logger-fd 1`
///
/// gpg reports verification on its log stream, so it is sent to stdout and
/// the invocation is marked as merging diagnostics into the output channel.
#[must_use]
pub fn build_verify_args(config: &GpgConfig) -> Invocation {
    let mut args = common_args(config);
    args.push(OsString::from("--logger-fd"));
    args.push(OsString::from("1"));
    args.push(OsString::from("--verify"));
    Invocation::new(args).merged_diagnostics()
}
