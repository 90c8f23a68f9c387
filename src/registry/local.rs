use async_trait::async_trait;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use tokio::io::AsyncReadExt;

use crate::error::{PlzError, Result};
use crate::types::BuildEvent;

use super::ImageRegistry;

/// Builds and stores images on the local Docker daemon, under a single
/// repository name. Grounded on `docker::service::DockerService::pull_image`
/// for the streaming-events idiom.
pub struct LocalRegistry {
    client: Docker,
    repository: String,
}

impl LocalRegistry {
    pub fn new(client: Docker, repository: String) -> Self {
        Self { client, repository }
    }
}

#[async_trait]
impl ImageRegistry for LocalRegistry {
    async fn build(
        &self,
        mut context: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        tag: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<BuildEvent>> + Send>>> {
        let mut buf = Vec::new();
        context.read_to_end(&mut buf).await.map_err(PlzError::Io)?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: self.full_reference(tag),
            rm: true,
            ..Default::default()
        };

        let body = bytes::Bytes::from(buf);
        let stream = self.client.build_image(options, None, Some(body));

        let events = stream.map(|result| match result {
            Ok(info) => {
                if let Some(err) = info.error {
                    Ok(BuildEvent::Error { error: err })
                } else if let Some(stream_line) = info.stream {
                    Ok(BuildEvent::Stream { stream: stream_line })
                } else {
                    Ok(BuildEvent::Stream { stream: String::new() })
                }
            }
            Err(e) => Ok(BuildEvent::Error { error: e.to_string() }),
        });

        Ok(Box::pin(events))
    }

    async fn push(&self, _tag: &str) -> Result<()> {
        Ok(())
    }

    async fn pull(&self, tag: &str) -> Result<()> {
        let reference = self.full_reference(tag);
        let options = Some(CreateImageOptions { from_image: reference.as_str(), ..Default::default() });
        let mut stream = self.client.create_image(options, None, None);
        while let Some(item) = stream.next().await {
            item.map_err(PlzError::Docker)?;
        }
        Ok(())
    }

    async fn can_pull(&self, retries: u32) -> bool {
        for _ in 0..retries.max(1) {
            if self.client.ping().await.is_ok() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        false
    }

    fn full_reference(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }
}
