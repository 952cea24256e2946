//! Pulse program compiler and uploader.
//!
//! The compiler is an opaque external tool. [`ExternalToolchain`] runs the command line from
//! [`ToolchainConfig::compiler`] with `{input}` and `{output}` substituted, and uploads the
//! resulting image by streaming its bytes over the open device session.

use std::fs;
use std::path::Path;
use std::process::Command;

use crate::config::ToolchainConfig;
use crate::error::{Error, Result};
use crate::protocol::DeviceSession;

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

pub trait Toolchain: Send {
    /// Compiles the pulse program at `source` into a device image at `image`.
    fn compile(&self, source: &Path, image: &Path) -> Result<()>;

    /// Transfers a compiled image to the device.
    fn upload(&self, image: &Path, session: &mut DeviceSession) -> Result<()>;
}

pub struct ExternalToolchain {
    compiler: Vec<String>,
}

impl ExternalToolchain {
    pub fn new(config: &ToolchainConfig) -> Self {
        Self {
            compiler: config.compiler.clone(),
        }
    }

    /// Compiler command line with the placeholders filled in
    pub fn command_line(&self, source: &Path, image: &Path) -> Result<Vec<String>> {
        if self.compiler.is_empty() {
            return Err(Error::Toolchain(
                "no compiler command configured ([toolchain] compiler)".to_string(),
            ));
        }
        let source = source.display().to_string();
        let image = image.display().to_string();
        Ok(self
            .compiler
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &source)
                    .replace(OUTPUT_PLACEHOLDER, &image)
            })
            .collect())
    }
}

impl Toolchain for ExternalToolchain {
    fn compile(&self, source: &Path, image: &Path) -> Result<()> {
        let args = self.command_line(source, image)?;
        log::info!("Compiling: {}", args.join(" "));
        let output = Command::new(&args[0])
            .args(&args[1..])
            .output()
            .map_err(|e| Error::Toolchain(format!("cannot run {}: {}", args[0], e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            log::debug!("{}", stdout.trim());
        }
        if !output.status.success() {
            return Err(Error::Toolchain(format!(
                "{} exited with {}: {}",
                args[0],
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !image.exists() {
            return Err(Error::Toolchain(format!(
                "compiler produced no image at {}",
                image.display()
            )));
        }
        Ok(())
    }

    fn upload(&self, image: &Path, session: &mut DeviceSession) -> Result<()> {
        let bytes = fs::read(image)?;
        session.write_all(&bytes)?;
        session.flush()?;
        log::info!("Uploaded {} bytes from {}", bytes.len(), image.display());
        Ok(())
    }
}
