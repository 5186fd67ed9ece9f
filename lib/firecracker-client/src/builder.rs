//! Firecracker instance builder, which returns an unstarted firecracker wrapper
use crate::firecracker::Firecracker;
use std::path::PathBuf;

/// Used for quickly generating builder pattern setter methods
macro_rules! with {
    // Match [`Option<T>`]
    ($field_name:expr, Option<$inner_type:ty>) => {
        paste::paste! {
            pub fn [<with_ $field_name>](&mut self, $field_name: $inner_type) -> &mut Self {
                self.[<$field_name>] = Some($field_name);
                self
            }
        }
    };

    // Match normal types
    ($field_name:expr, $field_type:ty) => {
        paste::paste! {
            pub fn [<with_ $field_name>](&mut self, $field_name: $field_type) -> &mut Self {
                self.[<$field_name>] = $field_name;
                self
            }
        }
    };
}

#[derive(Debug, Default, Clone)]
pub struct FirecrackerBuilder {
    firecracker_binary: PathBuf,

    /// Path to unix domain socket used by the api
    api_socket_path: Option<PathBuf>,
    /// Path to the file receiving the guest serial console (child stdout + stderr)
    serial_log_path: Option<PathBuf>,
}

impl FirecrackerBuilder {
    /// Create a new firecracker builder
    pub fn new(firecracker_binary: impl Into<PathBuf>) -> Self {
        Self {
            firecracker_binary: firecracker_binary.into(),
            ..Default::default()
        }
    }

    /// Build unstarted firecracker
    pub fn build(self) -> Result<Firecracker, crate::Error> {
        let firecracker_binary = &self.firecracker_binary;

        if !firecracker_binary.exists() {
            return Err(crate::Error::InvalidConfiguration(format!(
                "Firecracker binary not found: {}",
                firecracker_binary.display()
            )));
        }

        if !firecracker_binary.is_file() {
            return Err(crate::Error::InvalidConfiguration(format!(
                "Firecracker path is not a file: {}",
                firecracker_binary.display()
            )));
        }

        let api_socket_path = self.api_socket_path.ok_or_else(|| {
            crate::Error::InvalidConfiguration("Api socket path must be specified".to_string())
        })?;

        let serial_log_path = self.serial_log_path.ok_or_else(|| {
            crate::Error::InvalidConfiguration("Serial log path must be specified".to_string())
        })?;

        let args = vec![
            "--api-sock".to_string(),
            api_socket_path.to_string_lossy().to_string(),
        ];

        Ok(Firecracker::new(
            self.firecracker_binary,
            args,
            api_socket_path,
            serial_log_path,
        ))
    }
}

impl FirecrackerBuilder {
    with!(firecracker_binary, PathBuf);
    with!(api_socket_path, Option<PathBuf>);
    with!(serial_log_path, Option<PathBuf>);
}
