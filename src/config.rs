//! Config for the directory connection.
use std::{fs::File, io::BufReader, path::PathBuf, sync::Arc, time::Duration};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::Error;

/// Asset configuration, loaded once when the connector is initialized.
#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
	/// Hostname (or address) of the directory server
	pub server: String,
	/// The account used to bind
	pub username: String,
	/// The password for the bind account
	pub password: String,
	/// Connect with TLS on a dedicated port (`ldaps`) rather than plain `ldap`
	#[serde(default)]
	pub force_ssl: bool,
	/// Port to connect to, regardless of `force_ssl`
	#[serde(deserialize_with = "deserialize_port")]
	pub ssl_port: u16,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
}

impl std::fmt::Debug for Config {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Config")
			.field("server", &self.server)
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("force_ssl", &self.force_ssl)
			.field("ssl_port", &self.ssl_port)
			.field("connection", &self.connection)
			.finish()
	}
}

impl Config {
	/// Load the configuration from the flat mapping handed over by the host.
	pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
		Ok(serde_json::from_value(value)?)
	}

	/// The URL to connect to, built from the server, port and TLS flag.
	pub fn url(&self) -> Result<Url, Error> {
		let scheme = if self.force_ssl { "ldaps" } else { "ldap" };
		let url = Url::parse(&format!("{scheme}://{}:{}", self.server, self.ssl_port))
			.map_err(|err| Error::Invalid(format!("server address {}: {err}", self.server)))?;
		if url.host_str().map_or(true, str::is_empty) {
			return Err(Error::Invalid(format!("server address {} has no host", self.server)));
		}
		Ok(url)
	}
}

/// Accepts the port either as a number or as a numeric string.
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
	D: Deserializer<'de>,
{
	/// The two shapes a port may arrive in
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Port {
		/// `636`
		Number(u16),
		/// `"636"`
		Text(String),
	}

	match Port::deserialize(deserializer)? {
		Port::Number(port) => Ok(port),
		Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
	}
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// Timeout for each individual directory operation. Unset means the
	/// operation waits for as long as the transport does.
	pub operation_timeout: Option<Duration>,

	/// TLS config
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 30, operation_timeout: None, tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			for certificate in read_certificates(path)? {
				roots.add(&certificate).map_err(|err| {
					Error::Invalid(format!("Could not read root certificate: {err}"))
				})?;
			}

			let builder =
				ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);

			let client_config =
				match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
					(Some(key_path), Some(cert_path)) => builder
						.with_client_auth_cert(read_certificates(cert_path)?, read_key(key_path)?)
						.map_err(|err| {
							Error::Invalid(format!("Could not read client certificates: {err}"))
						})?,
					(None, None) => builder.with_no_client_auth(),
					_ => Err(Error::Invalid(
						"Both a client certificate and key file in PKCS8 format must be specified"
							.to_owned(),
					))?,
				};

			settings = settings.set_config(Arc::new(client_config));
		}
		Ok(settings)
	}
}

/// Read every PEM encoded certificate in a file.
fn read_certificates(path: &PathBuf) -> Result<Vec<Certificate>, Error> {
	let mut reader = BufReader::new(File::open(path)?);
	let certificates = rustls_pemfile::certs(&mut reader)?;
	if certificates.is_empty() {
		return Err(Error::Invalid(format!("No certificate found in {}", path.display())));
	}
	Ok(certificates.into_iter().map(Certificate).collect())
}

/// Read the first PKCS8 private key in a PEM file.
fn read_key(path: &PathBuf) -> Result<PrivateKey, Error> {
	let mut reader = BufReader::new(File::open(path)?);
	rustls_pemfile::pkcs8_private_keys(&mut reader)?
		.into_iter()
		.next()
		.map(PrivateKey)
		.ok_or_else(|| Error::Invalid(format!("No PKCS8 key found in {}", path.display())))
}
