use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_sdk_ecr::Client as EcrClient;
use bollard::auth::DockerCredentials;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{PlzError, Result};
use crate::types::BuildEvent;

use super::local::LocalRegistry;
use super::ImageRegistry;

struct CachedAuth {
    credentials: DockerCredentials,
    obtained_at: Instant,
}

/// Builds images on the local Docker daemon (delegating to [`LocalRegistry`]
/// for the actual build), then pushes/pulls against an AWS ECR repository,
/// re-authenticating the Docker credential whenever it's older than the
/// configured validity window: one forced re-auth plus one retry on an
/// expired-token failure, rather than a generic backoff loop, since ECR
/// auth tokens are all-or-nothing rather than transient.
pub struct EcrRegistry {
    docker: Docker,
    ecr: EcrClient,
    registry: String,
    repository: String,
    login_validity: Duration,
    cached_auth: Mutex<Option<CachedAuth>>,
    local: LocalRegistry,
}

impl EcrRegistry {
    pub fn new(docker: Docker, ecr: EcrClient, registry: String, repository: String, login_validity_minutes: i64) -> Self {
        let local = LocalRegistry::new(docker.clone(), repository.clone());
        Self {
            docker,
            ecr,
            registry,
            repository,
            login_validity: Duration::from_secs((login_validity_minutes.max(1) as u64) * 60),
            cached_auth: Mutex::new(None),
            local,
        }
    }

    async fn authenticate(&self) -> Result<DockerCredentials> {
        let token_response = self
            .ecr
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| PlzError::Internal(format!("ECR auth failed: {}", e)))?;

        let auth_data = token_response
            .authorization_data()
            .first()
            .ok_or_else(|| PlzError::Internal("ECR returned no authorization data".to_string()))?;

        let token = auth_data
            .authorization_token()
            .ok_or_else(|| PlzError::Internal("ECR authorization token missing".to_string()))?;

        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, token)
            .map_err(|e| PlzError::Internal(format!("invalid ECR token encoding: {}", e)))?;
        let decoded = String::from_utf8(decoded).map_err(|e| PlzError::Internal(e.to_string()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| PlzError::Internal("malformed ECR token".to_string()))?;

        Ok(DockerCredentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some(self.registry.clone()),
            ..Default::default()
        })
    }

    async fn credentials(&self, force: bool) -> Result<DockerCredentials> {
        if !force {
            let cached = self.cached_auth.lock();
            if let Some(auth) = cached.as_ref() {
                if auth.obtained_at.elapsed() < self.login_validity {
                    return Ok(auth.credentials.clone());
                }
            }
        }

        let credentials = self.authenticate().await?;
        *self.cached_auth.lock() = Some(CachedAuth { credentials: credentials.clone(), obtained_at: Instant::now() });
        Ok(credentials)
    }
}

#[async_trait]
impl ImageRegistry for EcrRegistry {
    async fn build(
        &self,
        context: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        tag: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<BuildEvent>> + Send>>> {
        self.local.build(context, tag).await
    }

    async fn push(&self, tag: &str) -> Result<()> {
        let reference = self.full_reference(tag);
        let local_ref = self.local.full_reference(tag);
        self.docker
            .tag_image(&local_ref, Some(bollard::image::TagImageOptions { repo: reference.clone(), tag: String::new() }))
            .await
            .map_err(PlzError::Docker)?;

        for attempt in 0..2 {
            let credentials = self.credentials(attempt == 1).await?;
            let mut stream = self.docker.push_image(
                &reference,
                None::<bollard::image::PushImageOptions<String>>,
                Some(credentials),
            );
            let mut auth_failed = false;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(_) => {}
                    Err(e) if is_auth_error(&e) => {
                        auth_failed = true;
                        break;
                    }
                    Err(e) => return Err(PlzError::Docker(e)),
                }
            }
            if !auth_failed {
                return Ok(());
            }
            warn!("ECR push auth expired, forcing re-auth (attempt {})", attempt + 1);
        }

        Err(PlzError::Internal("ECR push failed after forced re-auth".to_string()))
    }

    async fn pull(&self, tag: &str) -> Result<()> {
        let reference = self.full_reference(tag);
        for attempt in 0..2 {
            let credentials = self.credentials(attempt == 1).await?;
            let options = Some(CreateImageOptions { from_image: reference.as_str(), ..Default::default() });
            let mut stream = self.docker.create_image(options, None, Some(credentials));
            let mut auth_failed = false;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(_) => {}
                    Err(e) if is_auth_error(&e) => {
                        auth_failed = true;
                        break;
                    }
                    Err(e) => return Err(PlzError::Docker(e)),
                }
            }
            if !auth_failed {
                return Ok(());
            }
            warn!("ECR pull auth expired, forcing re-auth (attempt {})", attempt + 1);
        }
        Err(PlzError::Internal("ECR pull failed after forced re-auth".to_string()))
    }

    async fn can_pull(&self, retries: u32) -> bool {
        for _ in 0..retries.max(1) {
            if self.credentials(false).await.is_ok() {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        false
    }

    fn full_reference(&self, tag: &str) -> String {
        format!("{}/{}:{}", self.registry, self.repository, tag)
    }
}

fn is_auth_error(e: &bollard::errors::Error) -> bool {
    matches!(e, bollard::errors::Error::DockerResponseServerError { status_code: 401, .. })
}
