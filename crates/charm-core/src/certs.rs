//! Self-signed TLS material for admission webhooks.
//!
//! A CA and a server certificate signed by it are generated once per
//! application and kept in the charm state file. They are never rotated.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::component::Component;
use crate::error::CharmError;
use crate::error::CharmResult;
use crate::event::HookEvent;
use crate::state::StateStore;
use crate::status::Check;
use crate::status::Status;

/// PEM-encoded certificate material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub cert: String,
    pub key: String,
    pub ca: String,
}

/// Persisted certificate material; each part absent until generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateState {
    pub cert: Option<String>,
    pub key: Option<String>,
    pub ca: Option<String>,
}

impl CertificateState {
    pub fn bundle(&self) -> Option<CertificateBundle> {
        Some(CertificateBundle {
            cert: self.cert.clone()?,
            key: self.key.clone()?,
            ca: self.ca.clone()?,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.bundle().is_some()
    }
}

impl CertificateBundle {
    /// The CA certificate base64-encoded, as webhook `caBundle` fields expect.
    pub fn ca_bundle(&self) -> String {
        STANDARD.encode(self.ca.as_bytes())
    }
}

pub trait CertificateGenerator: Send + Sync {
    fn generate(&self, app_name: &str, model_name: &str) -> CharmResult<CertificateBundle>;
}

/// Generates certificates with the `openssl` command line tool.
#[derive(Debug, Clone)]
pub struct OpensslGenerator {
    binary: String,
}

impl Default for OpensslGenerator {
    fn default() -> Self {
        Self {
            binary: "openssl".to_string(),
        }
    }
}

impl OpensslGenerator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn openssl(&self, args: &[&str]) -> CharmResult<()> {
        debug!(?args, "running openssl");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .change_context_lazy(|| CharmError::Certificate {
                message: format!("failed to execute {}", self.binary),
            })?;
        if !output.status.success() {
            return Err(Report::new(CharmError::Certificate {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
            .attach_printable(format!("openssl {}", args.join(" "))));
        }
        Ok(())
    }
}

/// OpenSSL request config with the service DNS names as SANs.
fn ssl_config(app: &str, model: &str) -> String {
    format!(
        "[ req ]
default_bits = 2048
prompt = no
default_md = sha256
req_extensions = req_ext
distinguished_name = dn
[ dn ]
C = GB
ST = Canonical
L = Canonical
O = Canonical
OU = Canonical
CN = 127.0.0.1
[ req_ext ]
subjectAltName = @alt_names
[ alt_names ]
DNS.1 = {app}
DNS.2 = {app}.{model}
DNS.3 = {app}.{model}.svc
DNS.4 = {app}.{model}.svc.cluster
DNS.5 = {app}.{model}.svc.cluster.local
DNS.6 = localhost
IP.1 = 127.0.0.1
[ v3_ext ]
authorityKeyIdentifier=keyid,issuer:always
basicConstraints=CA:FALSE
keyUsage=keyEncipherment,dataEncipherment,digitalSignature
extendedKeyUsage=serverAuth,clientAuth
subjectAltName=@alt_names
"
    )
}

impl CertificateGenerator for OpensslGenerator {
    fn generate(&self, app_name: &str, model_name: &str) -> CharmResult<CertificateBundle> {
        let dir = tempfile::tempdir().change_context(CharmError::Certificate {
            message: "failed to create working directory".to_string(),
        })?;
        let file = |name: &str| dir.path().join(name).to_string_lossy().into_owned();
        let (conf, ca_key, server_key) = (file("ssl.conf"), file("ca.key"), file("server.key"));
        let (ca_crt, csr, cert) = (file("ca.crt"), file("server.csr"), file("cert.pem"));

        fs::write(&conf, ssl_config(app_name, model_name)).change_context(
            CharmError::Certificate {
                message: "failed to write openssl config".to_string(),
            },
        )?;

        self.openssl(&["genrsa", "-out", &ca_key, "2048"])?;
        self.openssl(&["genrsa", "-out", &server_key, "2048"])?;
        self.openssl(&[
            "req", "-x509", "-new", "-sha256", "-nodes", "-days", "3650", "-key", &ca_key,
            "-subj", "/CN=127.0.0.1", "-out", &ca_crt,
        ])?;
        self.openssl(&[
            "req", "-new", "-sha256", "-key", &server_key, "-out", &csr, "-config", &conf,
        ])?;
        self.openssl(&[
            "x509", "-req", "-sha256", "-in", &csr, "-CA", &ca_crt, "-CAkey", &ca_key,
            "-CAcreateserial", "-out", &cert, "-days", "365", "-extensions", "v3_ext",
            "-extfile", &conf,
        ])?;

        info!(app = app_name, model = model_name, "generated certificates");
        Ok(CertificateBundle {
            cert: read_pem(Path::new(&cert))?,
            key: read_pem(Path::new(&server_key))?,
            ca: read_pem(Path::new(&ca_crt))?,
        })
    }
}

fn read_pem(path: &Path) -> CharmResult<String> {
    fs::read_to_string(path).change_context_lazy(|| CharmError::Certificate {
        message: format!("failed to read {}", path.display()),
    })
}

/// Makes sure certificate material exists in the state store.
pub struct CertificateComponent {
    generator: Box<dyn CertificateGenerator>,
    store: Arc<StateStore<CertificateState>>,
    app_name: String,
    model_name: String,
}

impl CertificateComponent {
    pub fn new(
        generator: Box<dyn CertificateGenerator>,
        store: Arc<StateStore<CertificateState>>,
        app_name: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            store,
            app_name: app_name.into(),
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl Component for CertificateComponent {
    async fn status(&self) -> CharmResult<Status> {
        if self.store.get()?.is_complete() {
            Ok(Status::Active)
        } else {
            Ok(Status::waiting("Waiting for certificates to be generated"))
        }
    }

    async fn reconcile(&self, _event: &HookEvent) -> CharmResult<Check<()>> {
        if self.store.get()?.is_complete() {
            return Ok(Check::Pass(()));
        }

        let bundle = self.generator.generate(&self.app_name, &self.model_name)?;
        self.store.update(|state| {
            *state = CertificateState {
                cert: Some(bundle.cert),
                key: Some(bundle.key),
                ca: Some(bundle.ca),
            };
        })?;
        Ok(Check::Pass(()))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::testing::FakeCertificateGenerator;

    fn store(dir: &tempfile::TempDir) -> Arc<StateStore<CertificateState>> {
        Arc::new(StateStore::open(dir.path().join("state.json")).expect("open"))
    }

    #[test(tokio::test)]
    async fn generates_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let generator = FakeCertificateGenerator::new();
        let calls = generator.calls();
        let component = CertificateComponent::new(
            Box::new(generator),
            store.clone(),
            "katib-controller",
            "kubeflow",
        );

        assert!(matches!(
            component.status().await.expect("status"),
            Status::Waiting(_)
        ));

        component
            .reconcile(&HookEvent::Install)
            .await
            .expect("first");
        component
            .reconcile(&HookEvent::ConfigChanged)
            .await
            .expect("second");

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(component.status().await.expect("status"), Status::Active);
        let bundle = store.get().expect("state").bundle().expect("complete");
        assert_eq!(bundle.ca_bundle(), STANDARD.encode(bundle.ca.as_bytes()));
    }

    #[test(tokio::test)]
    async fn partial_state_is_regenerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        store
            .update(|state| state.ca = Some("ca".to_string()))
            .expect("seed");
        let generator = FakeCertificateGenerator::new();
        let calls = generator.calls();
        let component =
            CertificateComponent::new(Box::new(generator), store.clone(), "app", "model");

        component
            .reconcile(&HookEvent::Install)
            .await
            .expect("reconcile");

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(store.get().expect("state").is_complete());
    }

    #[test]
    fn config_lists_service_names() {
        let config = ssl_config("katib-controller", "kubeflow");
        assert!(config.contains("DNS.5 = katib-controller.kubeflow.svc.cluster.local"));
        assert!(config.contains("DNS.6 = localhost"));
        assert!(config.contains("IP.1 = 127.0.0.1"));
    }
}
