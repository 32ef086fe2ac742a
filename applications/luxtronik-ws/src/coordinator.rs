use crate::config::Config;
use crate::entity::{build_entities, EntitySet};
use crate::error::{AppError, Result, SetupError};
use crate::layout::FirmwareLayout;
use crate::session::Session;
use crate::snapshot::Snapshot;
use crate::xml;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info};
use xmltree::Element;

/// Runs poll cycles against one controller.
pub struct Coordinator {
    host: String,
    port: u16,
    password: String,
    cycle_timeout: Duration,
    layout: FirmwareLayout,
}

impl Coordinator {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
        cycle_timeout: Duration,
        layout: FirmwareLayout,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            cycle_timeout,
            layout,
        }
    }

    pub fn from_config(cfg: &Config, host: &str) -> Result<Self> {
        Ok(Self::new(
            host,
            cfg.luxtronik.port,
            cfg.luxtronik.password.clone(),
            cfg.cycle_timeout(),
            cfg.firmware_layout()?,
        ))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// First refresh plus the descriptors built from it.
    pub async fn setup(&self) -> Result<(Snapshot, EntitySet)> {
        let snapshot = self.refresh().await?;
        let entities = build_entities(&self.layout, &snapshot)?;
        Ok((snapshot, entities))
    }

    /// One complete cycle bounded by the cycle timeout.
    pub async fn refresh(&self) -> Result<Snapshot> {
        match tokio::time::timeout(self.cycle_timeout, self.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.cycle_timeout)),
        }
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let (mut session, navigation) =
            Session::connect(&self.host, self.port, &self.password).await?;
        let result = self.fetch_categories(&mut session, &navigation).await;
        session.close().await;

        let snapshot = result?;
        debug!(host = %self.host, categories = snapshot.len(), "poll cycle complete");
        Ok(snapshot)
    }

    async fn fetch_categories(&self, session: &mut Session, navigation: &Element) -> Result<Snapshot> {
        let resolved = self.layout.resolve(navigation)?;

        // Sections of one document share a single GET
        let mut documents: BTreeMap<String, Element> = BTreeMap::new();
        let mut categories = BTreeMap::new();
        for category in resolved {
            if !documents.contains_key(&category.id) {
                let doc = session.get(&category.id).await?;
                documents.insert(category.id.clone(), doc);
            }
            let doc = &documents[&category.id];
            let subtree = match category.source.section {
                Some(section) => xml::element_at(doc, section).cloned().ok_or_else(|| {
                    AppError::Layout(format!(
                        "category {} has no section {}",
                        category.source.key, section
                    ))
                })?,
                None => doc.clone(),
            };
            categories.insert(category.source.key, subtree);
        }
        Ok(Snapshot::new(categories))
    }
}

/// Try to log in once within `timeout`, reporting only the coarse failure
/// class. A controller that never answers counts as unreachable.
pub async fn validate_credentials(
    host: &str,
    port: u16,
    password: &str,
    timeout: Duration,
) -> std::result::Result<(), SetupError> {
    let attempt = match tokio::time::timeout(timeout, Session::connect(host, port, password)).await
    {
        Ok(attempt) => attempt,
        Err(_) => {
            debug!(host = %host, ?timeout, "credential check timed out");
            return Err(SetupError::CannotConnect);
        }
    };
    match attempt {
        Ok((session, _)) => {
            session.close().await;
            info!(host = %host, "credentials accepted");
            Ok(())
        }
        Err(e) => {
            let kind = e.setup_error();
            if kind == SetupError::Unknown {
                error!(host = %host, error = %e, "unexpected error while validating credentials");
            } else {
                debug!(host = %host, error = %e, kind = %kind, "credential check failed");
            }
            Err(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_validate_credentials_gives_up_on_stalled_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            validate_credentials("127.0.0.1", port, "999999", Duration::from_millis(200)),
        )
        .await
        .expect("credential check should return on its own");
        assert_eq!(result, Err(SetupError::CannotConnect));

        server.abort();
    }
}
