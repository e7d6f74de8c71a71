//! Per-function image materialization
//!
//! Packages the user source, a language wrapper and a Dockerfile into an
//! in-memory tar context and builds it into an image tagged per
//! (backend, function). Safe to call on every create/update.

pub mod wrapper;

use bollard::image::BuildImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::Function;
use crate::executor::Backend;

/// Error type for image build operations
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Failed to assemble build context: {0}")]
    Context(#[from] std::io::Error),
}

pub type BuildResult<T> = Result<T, BuildError>;

/// Builds and removes per-function container images
#[derive(Clone)]
pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Image tag for a (backend, function) pair
    pub fn image_tag(backend: Backend, function_id: i64) -> String {
        format!("fn-{}-{}", backend.as_str(), function_id)
    }

    /// Build the function's image for the given backend, returning its tag
    pub async fn prepare(&self, function: &Function, backend: Backend) -> BuildResult<String> {
        let tag = Self::image_tag(backend, function.id);
        let context = build_context(function)?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(context.into()));

        while let Some(result) = stream.next().await {
            let update = result?;

            if let Some(message) = update.stream {
                let message = message.trim();
                if !message.is_empty() {
                    debug!("Build {}: {}", tag, message);
                }
            }

            if let Some(error) = update.error {
                return Err(BuildError::Build(error));
            }
        }

        info!(
            "Built image {} for function {} ({})",
            tag, function.name, function.language
        );

        Ok(tag)
    }

    /// Delete the function's image. Best-effort: a removal failure is
    /// logged, never fatal.
    pub async fn remove(&self, function_id: i64, backend: Backend) {
        let tag = Self::image_tag(backend, function_id);

        match self.docker.remove_image(&tag, None, None).await {
            Ok(_) => info!("Removed image {}", tag),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => warn!("Failed to remove image {}: {}", tag, e),
        }
    }
}

/// Assemble the in-memory tar build context: Dockerfile, user source,
/// wrapper entrypoint.
pub fn build_context(function: &Function) -> std::io::Result<Vec<u8>> {
    let language = function.language;
    let mut archive = tar::Builder::new(Vec::new());

    append_file(&mut archive, "Dockerfile", wrapper::dockerfile(language))?;
    append_file(
        &mut archive,
        wrapper::function_filename(language),
        &function.code,
    )?;
    append_file(
        &mut archive,
        wrapper::wrapper_filename(language),
        wrapper::wrapper_source(language),
    )?;

    archive.into_inner()
}

fn append_file<W: std::io::Write>(
    archive: &mut tar::Builder<W>,
    name: &str,
    content: &str,
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    archive.append_data(&mut header, name, content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Language;

    fn sample_function(language: Language) -> Function {
        Function {
            id: 7,
            name: "hello".into(),
            route: "/hello".into(),
            language,
            code: "def handler(e): return e".into(),
            timeout: 10,
            memory: 128,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_image_tag_format() {
        assert_eq!(ImageBuilder::image_tag(Backend::Standard, 7), "fn-standard-7");
        assert_eq!(ImageBuilder::image_tag(Backend::Sandbox, 7), "fn-sandbox-7");
    }

    #[test]
    fn test_build_context_entries() {
        let context = build_context(&sample_function(Language::Python)).unwrap();

        let mut archive = tar::Archive::new(context.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();

        assert_eq!(names, vec!["Dockerfile", "function.py", "wrapper.py"]);
    }

    #[test]
    fn test_build_context_carries_user_code() {
        use std::io::Read;

        let function = sample_function(Language::Javascript);
        let context = build_context(&function).unwrap();

        let mut archive = tar::Archive::new(context.as_slice());
        let mut found = false;
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_str() == Some("function.js") {
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                assert_eq!(content, function.code);
                found = true;
            }
        }
        assert!(found);
    }
}
