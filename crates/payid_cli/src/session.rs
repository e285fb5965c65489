// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The commands of the CLI, acting on a PayID and signing keys kept in
//! [`Storage`] between invocations.

use crate::{
    config::AppConfig,
    storage::{Storage, IDENTITY_KEY, PAYID, SERVER_CERT, SERVER_KEY},
};
use anyhow::{bail, Context, Result};
use std::{fs, path::Path};
use verifiable_payid::{
    generate_identity_key, read_jwk_or_cert_chain_from_file, read_signing_key_from_pem_file,
    sign_with_keys, verify_pay_id, Address, CertificateChainValidator, ChainCheck, Curve,
    IdentityKeySigningParams, Jwk, KeyHandle, PayIdError, PaymentInformation,
    PaymentInformationInspectionResult, PaymentInformationInspector, ServerKeySigningParams,
    SignatureInspectionResult, SigningParams,
};

pub struct Session<S> {
    storage: S,
}

impl<S: Storage> Session<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The stored PayID document.
    ///
    /// # Errors
    ///
    /// Fails with [`PayIdError::MissingPayId`] if no PayID was initialised.
    pub fn payment_information(&self) -> Result<PaymentInformation> {
        let value = self.storage.get(PAYID)?.ok_or(PayIdError::MissingPayId)?;
        Ok(serde_json::from_value(value).context("stored PayID is corrupt")?)
    }

    fn store_payment_information(&self, info: &PaymentInformation) -> Result<()> {
        self.storage.set(PAYID, &serde_json::to_value(info)?)?;
        Ok(())
    }

    fn get_jwk(&self, name: &str) -> Result<Option<Jwk>> {
        self.storage
            .get(name)?
            .map(|value| {
                serde_json::from_value(value).with_context(|| format!("stored {name} is corrupt"))
            })
            .transpose()
    }

    fn set_jwk(&self, name: &str, jwk: &Jwk) -> Result<()> {
        self.storage.set(name, &serde_json::to_value(jwk)?)?;
        Ok(())
    }

    /// Starts a new PayID with no addresses, replacing any stored one.
    pub fn init(&self, pay_id: &str) -> Result<PaymentInformation> {
        if pay_id.is_empty() {
            return Err(PayIdError::MissingPayId.into());
        }
        let info = PaymentInformation::new(pay_id);
        self.store_payment_information(&info)?;
        Ok(info)
    }

    /// Replaces the stored PayID with the document in `file`.
    pub fn load(&self, file: &Path) -> Result<PaymentInformation> {
        let contents = fs::read_to_string(file)
            .with_context(|| format!("failed to read '{}'", file.display()))?;
        let info = PaymentInformation::from_json(&contents)
            .with_context(|| format!("'{}' is not a PayID document", file.display()))?;
        self.store_payment_information(&info)?;
        Ok(info)
    }

    /// Writes the stored PayID to `file`.
    pub fn save(&self, file: &Path) -> Result<()> {
        let json = self.payment_information()?.to_json_pretty()?;
        fs::write(file, json).with_context(|| format!("failed to write '{}'", file.display()))
    }

    pub fn add_address(
        &self,
        payment_network: &str,
        environment: &str,
        address: &str,
        tag: Option<&str>,
    ) -> Result<PaymentInformation> {
        let mut info = self.payment_information()?;
        info.addresses.push(Address::crypto(
            payment_network,
            Some(environment),
            address,
            tag,
        ));
        self.store_payment_information(&info)?;
        Ok(info)
    }

    /// Removes the first address whose address string is `address`.
    pub fn remove_address(&self, address: &str) -> Result<PaymentInformation> {
        let mut info = self.payment_information()?;
        let Some(index) = info
            .addresses
            .iter()
            .position(|a| a.address_string() == address)
        else {
            bail!("address {address} not found");
        };
        info.addresses.remove(index);
        self.store_payment_information(&info)?;
        Ok(info)
    }

    /// Generates and stores a new identity key. The private JWK is also
    /// written to `out` if given.
    pub fn generate_identity_key(&self, curve: Curve, out: Option<&Path>) -> Result<Jwk> {
        let jwk = generate_identity_key(curve)?;
        if let Some(out) = out {
            fs::write(out, serde_json::to_string_pretty(&jwk)?)
                .with_context(|| format!("failed to write '{}'", out.display()))?;
        }
        self.set_jwk(IDENTITY_KEY, &jwk)?;
        Ok(jwk)
    }

    /// Loads an identity key from a PEM or JWK file. Returns its public JWK.
    pub fn load_identity_key(&self, path: &Path) -> Result<Jwk> {
        let key = read_signing_key_from_pem_file(path)
            .with_context(|| format!("failed to load identity key from '{}'", path.display()))?;
        self.set_jwk(IDENTITY_KEY, &key.to_private_jwk()?)?;
        Ok(key.to_public_only()?)
    }

    /// Loads a server key and the certificate chain vouching for it. Returns
    /// the public JWK embedded in server-key signatures.
    pub fn load_server_key(&self, key_path: &Path, cert_path: &Path) -> Result<Jwk> {
        let key = read_signing_key_from_pem_file(key_path)
            .with_context(|| format!("failed to load server key from '{}'", key_path.display()))?;
        let cert = read_jwk_or_cert_chain_from_file(cert_path).with_context(|| {
            format!("failed to load certificate from '{}'", cert_path.display())
        })?;
        ServerKeySigningParams::new(key.clone(), cert.clone())?;
        self.set_jwk(SERVER_KEY, &key.to_private_jwk()?)?;
        self.set_jwk(SERVER_CERT, &cert)?;
        Ok(cert)
    }

    /// One line per loaded key.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for name in [IDENTITY_KEY, SERVER_KEY, SERVER_CERT] {
            let Some(jwk) = self.get_jwk(name)? else {
                continue;
            };
            let kid = jwk
                .kid
                .clone()
                .or_else(|| jwk.thumbprint().ok())
                .unwrap_or_else(|| "not set".into());
            lines.push(match &jwk.crv {
                Some(crv) => format!("{name}: type={}, curve={crv}, id={kid}", jwk.kty),
                None => format!("{name}: type={}, id={kid}", jwk.kty),
            });
        }
        Ok(lines)
    }

    pub fn clear_keys(&self) -> Result<()> {
        for name in [IDENTITY_KEY, SERVER_KEY, SERVER_CERT] {
            self.storage.remove(name)?;
        }
        Ok(())
    }

    /// Removes the PayID and every key.
    pub fn clear(&self) -> Result<()> {
        Ok(self.storage.clear()?)
    }

    /// Signing parameters for the loaded keys: the server key first, if both
    /// it and its certificate are loaded, then the identity key.
    pub fn signing_keys(&self, config: &AppConfig) -> Result<Vec<SigningParams>> {
        let mut params: Vec<SigningParams> = Vec::new();
        match (self.get_jwk(SERVER_KEY)?, self.get_jwk(SERVER_CERT)?) {
            (Some(key), Some(cert)) => {
                let key = KeyHandle::from_jwk(&key)?;
                let server = match config.server_algorithm()? {
                    Some(alg) => ServerKeySigningParams::with_algorithm(key, alg, cert)?,
                    None => ServerKeySigningParams::new(key, cert)?,
                };
                params.push(server.into());
            }
            (None, None) => {}
            _ => log::warn!("Ignoring server key without both key and certificate loaded"),
        }
        if let Some(jwk) = self.get_jwk(IDENTITY_KEY)? {
            let key = KeyHandle::from_jwk(&jwk)?;
            let identity = match config.identity_algorithm()? {
                Some(alg) => IdentityKeySigningParams::with_algorithm(key, alg)?,
                None => IdentityKeySigningParams::new(key),
            };
            params.push(identity.into());
        }
        Ok(params)
    }

    /// Signs every address of the stored PayID with every loaded key,
    /// replacing its verified addresses.
    ///
    /// # Errors
    ///
    /// Fails with [`PayIdError::MissingPayId`] if no PayID is initialised
    /// and with [`PayIdError::NoSigningKey`] if no key is loaded.
    pub fn sign(&self, config: &AppConfig) -> Result<PaymentInformation> {
        let mut info = self.payment_information()?;
        let pay_id = info.pay_id().ok_or(PayIdError::MissingPayId)?.to_owned();
        let keys = self.signing_keys(config)?;
        if keys.is_empty() {
            return Err(PayIdError::NoSigningKey.into());
        }
        info.verified_addresses = info
            .addresses
            .iter()
            .map(|address| sign_with_keys(&pay_id, address, &keys))
            .collect::<Result<_, _>>()?;
        log::info!(
            "Signed {} address(es) for {pay_id} with {} key(s)",
            info.verified_addresses.len(),
            keys.len()
        );
        self.store_payment_information(&info)?;
        Ok(info)
    }
}

/// Verifies `info`, returning a copy whose addresses are the signed ones, or
/// `None` if verification fails.
pub fn verify(
    info: &PaymentInformation,
    validator: &CertificateChainValidator,
) -> Option<PaymentInformation> {
    if !verify_pay_id(info, ChainCheck::Enforce(validator)) {
        return None;
    }
    let mut verified = info.clone();
    verified.addresses = info
        .verified_addresses
        .iter()
        .filter_map(|address| address.unsigned_address().ok())
        .map(|unsigned| unsigned.pay_id_address)
        .collect();
    verified.verified_addresses = Vec::new();
    Some(verified)
}

/// Renders an inspection of `info` as readable lines.
pub fn inspection_report(
    info: &PaymentInformation,
    validator: &CertificateChainValidator,
) -> Result<Vec<String>> {
    let result = PaymentInformationInspector::new(validator).inspect(info)?;
    Ok(render_report(&result))
}

fn verified_str(valid: bool) -> &'static str {
    if valid {
        "is verified"
    } else {
        "is NOT verified"
    }
}

fn render_report(result: &PaymentInformationInspectionResult) -> Vec<String> {
    let mut lines = vec![format!("{} {}", result.pay_id, verified_str(result.is_verified))];
    for address_result in &result.verified_addresses_results {
        match &address_result.address {
            Some(address) => lines.push(format!(
                "Found verified {} {} address {}",
                address.payment_network,
                address.environment.as_deref().unwrap_or_default(),
                address.address_string()
            )),
            None => lines.push("Found verified address with an unreadable payload".into()),
        }
        lines.push(format!(
            "- Signed with {} signature(s)",
            address_result.signatures_results.len()
        ));
        for (index, signature) in address_result.signatures_results.iter().enumerate() {
            render_signature(&mut lines, index, signature);
        }
    }
    lines
}

fn render_signature(lines: &mut Vec<String>, index: usize, signature: &SignatureInspectionResult) {
    lines.push(format!(
        "- Signature {} {}",
        index + 1,
        verified_str(signature.is_signature_valid)
    ));
    if let (Some(summary), Some(key_type)) = (&signature.key_summary, signature.key_type) {
        lines.push(format!(
            "  - Signed with {} {key_type} with thumbprint {}",
            summary.kty,
            summary.thumbprint.as_deref().unwrap_or("unknown")
        ));
    }
    if let Some(error) = &signature.error {
        lines.push(format!("  - Rejected: {error}"));
    }
    if let Some(chain) = &signature.certificate_chain_result {
        lines.push(format!(
            "  - Certificate chain {}",
            verified_str(chain.is_chain_valid)
        ));
        for (index, cert) in chain.certificate_results.iter().enumerate() {
            lines.push(format!(
                "     - Certificate {} for {}, issued by {}",
                index + 1,
                cert.issued_to.as_deref().unwrap_or(&cert.subject),
                cert.issued_by.as_deref().unwrap_or(&cert.issuer)
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;
    use serde_json::Value;
    use tempfile::TempDir;
    use verifiable_payid::{Algorithm, KeyName};

    const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../verifiable_payid/tests");
    const AT: u64 = 1_893_456_000_000;

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(FIXTURES).join(name)
    }

    fn session() -> (TempDir, Session<FileStorage>) {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(FileStorage::new(dir.path().join("state")));
        (dir, session)
    }

    fn trusting_root() -> CertificateChainValidator {
        let mut validator = CertificateChainValidator::empty().with_verification_time(AT);
        validator
            .add_root_certificate_file(fixture("root.pem"))
            .unwrap();
        validator
    }

    fn payid_error(err: &anyhow::Error) -> Option<&PayIdError> {
        err.downcast_ref::<PayIdError>()
    }

    #[test]
    fn test_sign_without_payid() {
        let (_dir, session) = session();
        let err = session.sign(&AppConfig::default()).unwrap_err();
        assert!(matches!(payid_error(&err), Some(PayIdError::MissingPayId)));
    }

    #[test]
    fn test_sign_without_keys() {
        let (_dir, session) = session();
        session.init("alice$payid.example").unwrap();
        let err = session.sign(&AppConfig::default()).unwrap_err();
        assert!(matches!(payid_error(&err), Some(PayIdError::NoSigningKey)));
    }

    #[test]
    fn test_init_empty_payid() {
        let (_dir, session) = session();
        assert!(session.init("").is_err());
    }

    #[test]
    fn test_address_add_remove() {
        let (_dir, session) = session();
        session.init("Alice$PayID.example").unwrap();
        session
            .add_address("xrpl", "testnet", "rP3t3JStqWPYd8H88WfBYh3v84qqYzbHQ6", None)
            .unwrap();
        let info = session
            .add_address("btc", "mainnet", "bc1qexample", Some("7"))
            .unwrap();
        assert_eq!(info.pay_id.as_deref(), Some("alice$payid.example"));
        assert_eq!(info.addresses.len(), 2);
        assert_eq!(info.addresses[0].payment_network, "XRPL");

        let info = session
            .remove_address("rP3t3JStqWPYd8H88WfBYh3v84qqYzbHQ6")
            .unwrap();
        assert_eq!(info.addresses.len(), 1);
        assert_eq!(info.addresses[0].address_string(), "bc1qexample");
        assert!(session.remove_address("missing").is_err());
        assert_eq!(session.payment_information().unwrap(), info);
    }

    #[test]
    fn test_generate_sign_verify() {
        let (dir, session) = session();
        session.init("alice$payid.example").unwrap();
        session
            .add_address("XRPL", "TESTNET", "rP3t3JStqWPYd8H88WfBYh3v84qqYzbHQ6", None)
            .unwrap();
        let out = dir.path().join("identity-key.json");
        let jwk = session
            .generate_identity_key(Curve::Secp256k1, Some(&out))
            .unwrap();
        assert!(jwk.is_private());
        assert!(out.is_file());

        let info = session.sign(&AppConfig::default()).unwrap();
        assert_eq!(info.verified_addresses.len(), 1);
        assert_eq!(info.verified_addresses[0].signatures.len(), 1);

        let verified = verify(&info, &CertificateChainValidator::empty()).unwrap();
        assert_eq!(verified.addresses, info.addresses);
        assert!(verified.verified_addresses.is_empty());

        // The written key file can be loaded back.
        let (_dir2, other) = session_with_identity(&out);
        assert_eq!(other.list_keys().unwrap().len(), 1);
    }

    fn session_with_identity(key: &Path) -> (TempDir, Session<FileStorage>) {
        let (dir, session) = session();
        session.load_identity_key(key).unwrap();
        (dir, session)
    }

    #[test]
    fn test_sign_with_server_and_identity_keys() {
        let (_dir, session) = session();
        session.init("alice$payid.example").unwrap();
        session
            .add_address("XRPL", "TESTNET", "rP3t3JStqWPYd8H88WfBYh3v84qqYzbHQ6", None)
            .unwrap();
        session
            .load_server_key(&fixture("server.key"), &fixture("server.fullchain.pem"))
            .unwrap();
        session
            .load_identity_key(&fixture("identity-ed25519.key"))
            .unwrap();

        let info = session.sign(&AppConfig::default()).unwrap();
        let signatures = &info.verified_addresses[0].signatures;
        assert_eq!(signatures.len(), 2);

        let keys = session.signing_keys(&AppConfig::default()).unwrap();
        assert_eq!(keys[0].key_type(), KeyName::ServerKey);
        assert_eq!(keys[1].key_type(), KeyName::IdentityKey);

        assert!(verify(&info, &trusting_root()).is_some());
        assert!(verify(&info, &CertificateChainValidator::empty()).is_none());
    }

    #[test]
    fn test_server_key_must_match_certificate() {
        let (_dir, session) = session();
        assert!(session
            .load_server_key(&fixture("rogue-server.key"), &fixture("server.fullchain.pem"))
            .is_err());
        assert!(session.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_configured_algorithm() {
        let (_dir, session) = session();
        session.load_identity_key(&fixture("identity-rsa.key")).unwrap();
        let config = AppConfig {
            identity_key_algorithm: Some("RS256".into()),
            ..Default::default()
        };
        let keys = session.signing_keys(&config).unwrap();
        assert_eq!(keys[0].alg(), Algorithm::Rs256);

        let config = AppConfig {
            identity_key_algorithm: Some("ES256".into()),
            ..Default::default()
        };
        assert!(session.signing_keys(&config).is_err());
    }

    #[test]
    fn test_list_and_clear_keys() {
        let (_dir, session) = session();
        session.init("alice$payid.example").unwrap();
        session
            .load_server_key(&fixture("server.key"), &fixture("server.fullchain.pem"))
            .unwrap();
        session
            .load_identity_key(&fixture("identity-p256.key"))
            .unwrap();
        let lines = session.list_keys().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("identity-key: type=EC, curve=P-256, id="));
        assert!(lines[1].starts_with("server-key: "));
        assert!(lines[2].starts_with("server-cert: "));

        session.clear_keys().unwrap();
        assert!(session.list_keys().unwrap().is_empty());
        assert!(session.payment_information().is_ok());

        session.clear().unwrap();
        assert!(session.payment_information().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let (dir, session) = session();
        session.init("alice$payid.example").unwrap();
        session
            .add_address("XRPL", "TESTNET", "rP3t3JStqWPYd8H88WfBYh3v84qqYzbHQ6", None)
            .unwrap();
        let file = dir.path().join("alice.json");
        session.save(&file).unwrap();

        let (_dir2, other) = self::session();
        let loaded = other.load(&file).unwrap();
        assert_eq!(loaded, session.payment_information().unwrap());
        assert!(other.load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_inspection_report() {
        let (_dir, session) = session();
        let info = session.load(&fixture("signed-payid.json")).unwrap();
        let lines = inspection_report(&info, &trusting_root()).unwrap();
        assert_eq!(lines[0], "alice$payid.example is verified");
        assert!(lines.contains(&"- Signed with 2 signature(s)".to_string()));
        assert!(lines.contains(&"  - Certificate chain is verified".to_string()));
        assert!(lines.contains(
            &"     - Certificate 1 for test.payid.example, issued by PayID Example Intermediate CA"
                .to_string()
        ));

        let lines = inspection_report(&info, &CertificateChainValidator::empty()).unwrap();
        assert_eq!(lines[0], "alice$payid.example is NOT verified");
        assert!(lines.contains(&"  - Certificate chain is NOT verified".to_string()));
    }

    #[test]
    fn test_stored_value_shape() {
        let (_dir, session) = session();
        session.init("alice$payid.example").unwrap();
        let value: Value = session.storage.get(PAYID).unwrap().unwrap();
        assert_eq!(value["payId"], "alice$payid.example");
        assert_eq!(value["addresses"], serde_json::json!([]));
    }
}
