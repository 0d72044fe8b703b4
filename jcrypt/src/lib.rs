//! gpg encryption, decryption, signing and verification for bytes and files.
//!
//! Every operation runs one gpg subprocess through the `jcrypt-pipe`
//! pipeline. File-to-file operations stream when given an explicit
//! destination and rewrite the source in place when not.

/// gpg argument construction.
pub mod cmd;
/// Client configuration file.
pub mod config;
/// Error types returned by client operations.
pub mod error;

pub use cmd::GpgConfig;
pub use config::JcryptConfig;
pub use error::JcryptError;
pub use jcrypt_pipe::{
    default_write_options, set_default_write_options, CancellationController, Encoding,
    WriteFlags, WriteOptions,
};

use jcrypt_pipe::{Invocation, PipeError, Transformer};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the gpg binary path.
pub const GPG_BIN_ENV_VAR: &str = "JCRYPT_GPG_BIN";

const GPG_NAMES: &[&str] = &["gpg", "gpg2"];

/// High-level gpg client.
#[derive(Debug, Clone)]
pub struct Jcrypt {
    transformer: Transformer,
    /// gpg flags used by every operation.
    pub gpg: GpgConfig,
}

impl Jcrypt {
    /// Wraps an already located gpg binary.
    #[must_use]
    pub fn new(gpg_path: impl Into<PathBuf>, gpg: GpgConfig) -> Self {
        Self {
            transformer: Transformer::new(gpg_path),
            gpg,
        }
    }

    /// Discovers gpg and applies `config`.
    ///
    /// Write options from the config are pinned on this client; use
    /// [`set_default_write_options`] to change the process-wide default instead.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::GpgNotFound` if no gpg binary can be located, or
    /// `JcryptError::Config` if the configured file mode is not a permission mask.
    pub fn from_config(config: JcryptConfig) -> Result<Self, JcryptError> {
        let mode = config.write_options.mode;
        if mode & !0o7777 != 0 {
            return Err(JcryptError::Config(format!(
                "write_options.mode {mode:o} is not a permission mask"
            )));
        }

        let transformer = Transformer::discover(GPG_NAMES, GPG_BIN_ENV_VAR, config.gpg_path)
            .map_err(|e| match e {
                PipeError::ExecutableNotFound(reason) => {
                    tracing::debug!(%reason, "gpg discovery failed");
                    JcryptError::GpgNotFound {
                        var: GPG_BIN_ENV_VAR,
                    }
                }
                other => JcryptError::Pipe(other),
            })?
            .with_write_options(config.write_options);
        Ok(Self {
            transformer,
            gpg: config.gpg,
        })
    }

    /// Uses a dedicated cancellation controller instead of the global one.
    #[must_use]
    pub fn with_cancellation(mut self, controller: CancellationController) -> Self {
        self.transformer = self.transformer.with_cancellation(controller);
        self
    }

    /// Pins write options on this client.
    #[must_use]
    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.transformer = self.transformer.with_write_options(options);
        self
    }

    /// The write options a request started now would use.
    #[must_use]
    pub fn write_options(&self) -> WriteOptions {
        self.transformer.write_options()
    }

    /// A copy of this client whose file-to-file operations never stream.
    ///
    /// The source is read through the pipeline's own file adapter, so a
    /// missing source is still a `PipeError::Io`.
    #[must_use]
    pub fn buffered(&self) -> Self {
        let options = WriteOptions {
            force_buffered: true,
            ..self.write_options()
        };
        self.clone().with_write_options(options)
    }

    /// Path of the gpg binary in use.
    #[must_use]
    pub fn gpg_path(&self) -> &Path {
        &self.transformer.path
    }

    fn encrypt_args(&self) -> Invocation {
        cmd::build_encrypt_args(&self.gpg)
    }

    fn decrypt_args(&self) -> Invocation {
        cmd::build_decrypt_args(&self.gpg)
    }

    /// Encrypts bytes in memory.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if gpg fails; its message is gpg's stderr.
    pub async fn encrypt(&self, data: impl Into<Vec<u8>>) -> Result<Vec<u8>, JcryptError> {
        Ok(self.transformer.transform(data, self.encrypt_args()).await?)
    }

    /// Decrypts bytes in memory.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if gpg fails.
    pub async fn decrypt(&self, data: impl Into<Vec<u8>>) -> Result<Vec<u8>, JcryptError> {
        Ok(self.transformer.transform(data, self.decrypt_args()).await?)
    }

    /// Returns the encrypted contents of a file without writing anything.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if the file cannot be read or gpg fails.
    pub async fn encrypt_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, JcryptError> {
        Ok(self.transformer.transform_file(path, self.encrypt_args()).await?)
    }

    /// Returns the decrypted contents of a file without writing anything.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if the file cannot be read or gpg fails.
    pub async fn decrypt_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, JcryptError> {
        Ok(self.transformer.transform_file(path, self.decrypt_args()).await?)
    }

    /// Encrypts `src` into `dest`, or in place when `dest` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe`; a `dest` equal to `src` is a configuration error.
    pub async fn encrypt_to_file(
        &self,
        src: impl AsRef<Path>,
        dest: Option<&Path>,
    ) -> Result<PathBuf, JcryptError> {
        Ok(self
            .transformer
            .transform_file_to_file(src, dest, self.encrypt_args())
            .await?)
    }

    /// Decrypts `src` into `dest`, or in place when `dest` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe`; a `dest` equal to `src` is a configuration error.
    pub async fn decrypt_to_file(
        &self,
        src: impl AsRef<Path>,
        dest: Option<&Path>,
    ) -> Result<PathBuf, JcryptError> {
        Ok(self
            .transformer
            .transform_file_to_file(src, dest, self.decrypt_args())
            .await?)
    }

    /// Encrypts bytes into `dest`, or to standard output when `dest` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if gpg fails or `dest` cannot be written.
    pub async fn encrypt_data_to_file(
        &self,
        data: impl Into<Vec<u8>>,
        dest: Option<&Path>,
    ) -> Result<Option<PathBuf>, JcryptError> {
        self.data_to_file(data.into(), dest, self.encrypt_args()).await
    }

    /// Decrypts bytes into `dest`, or to standard output when `dest` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if gpg fails or `dest` cannot be written.
    pub async fn decrypt_data_to_file(
        &self,
        data: impl Into<Vec<u8>>,
        dest: Option<&Path>,
    ) -> Result<Option<PathBuf>, JcryptError> {
        self.data_to_file(data.into(), dest, self.decrypt_args()).await
    }

    async fn data_to_file(
        &self,
        data: Vec<u8>,
        dest: Option<&Path>,
        invocation: Invocation,
    ) -> Result<Option<PathBuf>, JcryptError> {
        match dest {
            Some(dest) => Ok(Some(
                self.transformer
                    .transform_bytes_to_file(data, dest, invocation)
                    .await?,
            )),
            None => {
                self.transformer
                    .transform_bytes_to_stdout(data, invocation)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Streams an encrypted copy of `src` to standard output.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if the file cannot be opened or gpg fails.
    pub async fn encrypt_to_stdout(&self, src: impl AsRef<Path>) -> Result<(), JcryptError> {
        Ok(self
            .transformer
            .stream_file_to_stdout(src, self.encrypt_args())
            .await?)
    }

    /// Streams a decrypted copy of `src` to standard output.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if the file cannot be opened or gpg fails.
    pub async fn decrypt_to_stdout(&self, src: impl AsRef<Path>) -> Result<(), JcryptError> {
        Ok(self
            .transformer
            .stream_file_to_stdout(src, self.decrypt_args())
            .await?)
    }

    /// Signs bytes in memory.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if gpg fails.
    pub async fn sign(&self, data: impl Into<Vec<u8>>) -> Result<Vec<u8>, JcryptError> {
        Ok(self
            .transformer
            .transform(data, cmd::build_sign_args(&self.gpg))
            .await?)
    }

    /// Signs bytes into `dest`, or to standard output when `dest` is `None`.
    ///
    /// The file is written with the client's write options.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if gpg fails or `dest` cannot be written.
    pub async fn sign_to_file(
        &self,
        data: impl Into<Vec<u8>>,
        dest: Option<&Path>,
    ) -> Result<Option<PathBuf>, JcryptError> {
        self.data_to_file(data.into(), dest, cmd::build_sign_args(&self.gpg))
            .await
    }

    /// Verifies signed bytes, returning gpg's report.
    ///
    /// The report and any failure text both come from gpg's log, which the
    /// verify invocation routes to the output channel.
    ///
    /// # Errors
    ///
    /// Returns `JcryptError::Pipe` if the signature does not verify; its
    /// message is gpg's log output.
    pub async fn verify(&self, data: impl Into<Vec<u8>>) -> Result<String, JcryptError> {
        let report = self
            .transformer
            .transform(data, cmd::build_verify_args(&self.gpg))
            .await?;
        Ok(String::from_utf8_lossy(&report).into_owned())
    }
}
