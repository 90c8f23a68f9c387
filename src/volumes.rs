//! Volume Builder.
//!
//! Materializes a small set of files (configuration, run parameters) as a
//! named Docker volume without baking them into the snapshot image. The
//! `tar` crate builder pattern follows the gzip-tar stack declared in
//! `src-tauri/Cargo.toml`; the exact mount path and helper-container
//! technique are grounded on the original controller's `volumes.py`:
//! a throwaway `busybox` container sleeps while the tar is unpacked into
//! the volume via `put_archive`, then is torn down.

use std::collections::HashMap;
use std::io::Cursor;

use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions, UploadToContainerOptions};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use tar::{Builder, EntryType, Header};
use uuid::Uuid;

use crate::error::{PlzError, Result};
use crate::types::VolumeObject;

/// Mount path for the built volume inside the execution container.
pub const VOLUME_MOUNT: &str = "/batman";
pub const CONFIGURATION_FILE: &str = "configuration.json";
pub const OUTPUT_DIRECTORY: &str = "output";

pub struct VolumeBuilder {
    client: Docker,
}

impl VolumeBuilder {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    /// Build an in-memory tar from `objects`, create a named volume
    /// (`name`), and unpack the tar into it via a throwaway helper
    /// container. Returns the created volume's name.
    pub async fn create(&self, name: &str, objects: &[VolumeObject]) -> Result<String> {
        let tarball = Self::build_tar(objects)?;

        self.client
            .create_volume(CreateVolumeOptions { name, ..Default::default() })
            .await
            .map_err(PlzError::Docker)?;

        let helper_name = format!("plz-volume-helper.{}", Uuid::new_v4());
        let config = Config {
            image: Some("busybox:latest".to_string()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep 600 & PID=$!; trap \"kill $PID\" TERM; wait $PID".to_string(),
            ]),
            host_config: Some(bollard::models::HostConfig {
                mounts: Some(vec![bollard::models::Mount {
                    target: Some("/output".to_string()),
                    source: Some(name.to_string()),
                    typ: Some(bollard::models::MountTypeEnum::VOLUME),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.client
            .create_container(Some(CreateContainerOptions { name: helper_name.clone(), platform: None }), config)
            .await
            .map_err(PlzError::Docker)?;

        self.client
            .start_container::<String>(&helper_name, None)
            .await
            .map_err(PlzError::Docker)?;

        let upload_result = self
            .client
            .upload_to_container(
                &helper_name,
                Some(UploadToContainerOptions { path: "/output", ..Default::default() }),
                tarball.into(),
            )
            .await;

        let _ = self.client.stop_container(&helper_name, None).await;
        let _ = self
            .client
            .remove_container(&helper_name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await;

        upload_result.map_err(PlzError::Docker)?;

        Ok(name.to_string())
    }

    /// Remove a previously-created volume. Unlike the original
    /// implementation, this does not append a stray `"x"` to the volume
    /// name before looking it up — that was a bug, not a convention.
    pub async fn remove(&self, name: &str) -> Result<()> {
        match self.client.remove_volume(name, None::<RemoveVolumeOptions>).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(PlzError::Docker(e)),
        }
    }

    fn build_tar(objects: &[VolumeObject]) -> Result<Vec<u8>> {
        let mut builder = Builder::new(Vec::new());
        for object in objects {
            match object {
                VolumeObject::File { path, contents } => {
                    let mut header = Header::new_gnu();
                    header.set_size(contents.len() as u64);
                    header.set_mode(0o644);
                    header.set_entry_type(EntryType::Regular);
                    header.set_cksum();
                    builder
                        .append_data(&mut header, path, Cursor::new(contents))
                        .map_err(|e| PlzError::Internal(e.to_string()))?;
                }
                VolumeObject::Directory { path } => {
                    let mut header = Header::new_gnu();
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_entry_type(EntryType::Directory);
                    header.set_cksum();
                    builder
                        .append_data(&mut header, path, Cursor::new(Vec::new()))
                        .map_err(|e| PlzError::Internal(e.to_string()))?;
                }
            }
        }
        builder.into_inner().map_err(|e| PlzError::Internal(e.to_string()))
    }

    /// Build the `configuration.json` volume object from run parameters.
    pub fn configuration_object(parameters: &HashMap<String, String>) -> Result<VolumeObject> {
        let contents = serde_json::to_vec(parameters).map_err(|e| PlzError::Internal(e.to_string()))?;
        Ok(VolumeObject::File { path: CONFIGURATION_FILE.to_string(), contents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tar_with_file_and_directory_entries() {
        let objects = vec![
            VolumeObject::Directory { path: OUTPUT_DIRECTORY.to_string() },
            VolumeObject::File { path: CONFIGURATION_FILE.to_string(), contents: b"{}".to_vec() },
        ];
        let tar_bytes = VolumeBuilder::build_tar(&objects).unwrap();
        assert!(!tar_bytes.is_empty());

        let mut archive = tar::Archive::new(Cursor::new(tar_bytes));
        let entries: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|p| p.contains(OUTPUT_DIRECTORY)));
        assert!(entries.iter().any(|p| p.contains(CONFIGURATION_FILE)));
    }
}
