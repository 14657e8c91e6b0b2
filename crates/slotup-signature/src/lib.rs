//! PKCS#7/CMS signature verification for bundle authentication.
//!
//! A bundle's trailing signature block is a DER signed-data structure in
//! one of two shapes: *detached* (signs the bundle's content window,
//! supplied by the caller) or *inline* (carries the signed payload
//! itself, here the manifest bytes). Detection is split from
//! verification so the bundle reader can pick the right calling
//! convention instead of guessing, and the trust boundary (the CA
//! store) stays separate from the message boundary (the signature).
//!
//! Verification fails closed: parse errors, untrusted chains and
//! detached/inline mismatches with the caller's expectation are all hard
//! failures.

mod der;
mod error;

use std::path::{Path, PathBuf};

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::X509;
use tracing::{debug, info};

pub use error::{Result, SignatureError};

/// Report whether a signature block is detached (needs external
/// content) or inline (carries its own payload).
pub fn is_detached(signature: &[u8]) -> Result<bool> {
    der::is_detached(signature)
}

/// An X.509 verification store built from CA certificates on disk.
pub struct TrustStore {
    store: X509Store,
    source: PathBuf,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("source", &self.source)
            .finish()
    }
}

impl TrustStore {
    /// Load a trust store from a single PEM file holding one or more CA
    /// certificates.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path)?;
        let certs = X509::stack_from_pem(&pem)
            .map_err(|e| SignatureError::Parse(format!("{}: {e}", path.display())))?;
        if certs.is_empty() {
            return Err(SignatureError::Parse(format!(
                "{}: no certificates found",
                path.display()
            )));
        }

        let mut builder = X509StoreBuilder::new()?;
        for cert in certs {
            builder.add_cert(cert)?;
        }

        Ok(Self {
            store: builder.build(),
            source: path.to_path_buf(),
        })
    }

    /// Try candidate CA paths in order and build a store from the first
    /// one that loads.
    ///
    /// Certificate deployment varies between device generations, so the
    /// caller hands over every location a keyring may live in; only
    /// exhausting all of them is an error.
    pub fn from_candidates<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        for path in paths {
            let path = path.as_ref();
            match Self::from_pem_file(path) {
                Ok(store) => {
                    info!(path = %path.display(), "loaded CA trust store");
                    return Ok(store);
                }
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "CA candidate not usable");
                }
            }
        }

        Err(SignatureError::NoUsableTrustAnchor {
            tried: paths
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// The path the store was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Outcome of a successful verification.
#[derive(Debug)]
pub struct VerifiedSignature {
    /// Whether the signature was detached.
    pub detached: bool,
    /// Subject of the first signer certificate, for audit logging.
    pub signer_subject: String,
    /// The embedded payload, present only for inline signatures.
    pub payload: Option<Vec<u8>>,
}

/// Verify a signature block against the trust store.
///
/// For detached signatures `content` must be `Some` and no payload is
/// returned; for inline signatures `content` must be `None` and the
/// embedded payload is returned.
pub fn verify(
    content: Option<&[u8]>,
    signature: &[u8],
    trust: &TrustStore,
) -> Result<VerifiedSignature> {
    let detached = der::is_detached(signature)?;

    if detached && content.is_none() {
        return Err(SignatureError::DetachedContentRequired);
    }
    if !detached && content.is_some() {
        return Err(SignatureError::InlineContentUnexpected);
    }

    let pkcs7 =
        Pkcs7::from_der(signature).map_err(|e| SignatureError::Parse(e.to_string()))?;
    let extra_certs = Stack::new()?;

    let payload = if detached {
        pkcs7.verify(
            &extra_certs,
            &trust.store,
            content,
            None,
            Pkcs7Flags::BINARY,
        )?;
        None
    } else {
        let mut embedded = Vec::new();
        pkcs7.verify(
            &extra_certs,
            &trust.store,
            None,
            Some(&mut embedded),
            Pkcs7Flags::BINARY,
        )?;
        if embedded.is_empty() {
            return Err(SignatureError::Verification(
                "inline signature carries empty payload".to_string(),
            ));
        }
        Some(embedded)
    };

    let signer_subject = first_signer_subject(&pkcs7, &extra_certs)?;
    info!(
        signer = %signer_subject,
        kind = if detached { "detached" } else { "inline" },
        "signature verified"
    );

    Ok(VerifiedSignature {
        detached,
        signer_subject,
        payload,
    })
}

/// Extract a human-readable subject line for the first signer.
fn first_signer_subject(pkcs7: &Pkcs7, extra_certs: &Stack<X509>) -> Result<String> {
    let signers = pkcs7.signers(extra_certs, Pkcs7Flags::empty())?;
    let signer = signers.iter().next().ok_or(SignatureError::NoSigner)?;

    let mut parts = Vec::new();
    for entry in signer.subject_name().entries() {
        let key = entry.object().nid().short_name().unwrap_or("?");
        match entry.data().as_utf8() {
            Ok(value) => parts.push(format!("{key}={value}")),
            Err(_) => parts.push(format!("{key}=<non-utf8>")),
        }
    }
    if parts.is_empty() {
        return Err(SignatureError::NoSigner);
    }

    Ok(parts.join(", "))
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit {
    //! Signing helpers for tests: a throwaway CA and signature blocks in
    //! both shapes. Not part of the engine; bundle creation tooling is
    //! out of scope.

    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::stack::Stack;
    use openssl::x509::{X509Builder, X509NameBuilder, X509};

    /// Generate a self-signed certificate and its private key.
    pub fn generate_keypair(common_name: &str) -> (X509, PKey<Private>) {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        (builder.build(), key)
    }

    /// Produce a detached signature block over `content`.
    pub fn sign_detached(cert: &X509, key: &PKey<Private>, content: &[u8]) -> Vec<u8> {
        let certs = Stack::new().unwrap();
        Pkcs7::sign(
            cert,
            key,
            &certs,
            content,
            Pkcs7Flags::BINARY | Pkcs7Flags::DETACHED,
        )
        .unwrap()
        .to_der()
        .unwrap()
    }

    /// Produce an inline signature block embedding `payload`.
    pub fn sign_inline(cert: &X509, key: &PKey<Private>, payload: &[u8]) -> Vec<u8> {
        let certs = Stack::new().unwrap();
        Pkcs7::sign(cert, key, &certs, payload, Pkcs7Flags::BINARY)
            .unwrap()
            .to_der()
            .unwrap()
    }

    /// Write a certificate to a PEM file usable as a trust-store source.
    pub fn write_ca_pem(cert: &X509, path: &std::path::Path) {
        std::fs::write(path, cert.to_pem().unwrap()).unwrap();
    }
}
