use anyhow::bail;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use tracing::{debug, info};

/// What a node certificate should assert.
#[derive(Debug, Clone, Default)]
pub struct CertRequest {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ips: Vec<String>,
    /// Names such as `digital signature`, `key encipherment`, `server auth`
    pub key_usages: Vec<String>,
}

/// PEM material of an issued certificate.
#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: String,
}

/// Certificate Authority that signs node certificates for services.
pub struct ClusterCA {
    ca_cert_pem: String,
    ca_key_pair: KeyPair,
    ca_cert: rcgen::Certificate,
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, "dataplane-operator");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

impl ClusterCA {
    /// Create a new CA with a freshly-generated self-signed root certificate.
    pub fn new(common_name: &str) -> anyhow::Result<Self> {
        info!("Generating CA {}", common_name);

        let key_pair = KeyPair::generate()?;
        let ca_cert = ca_params(common_name).self_signed(&key_pair)?;
        let ca_cert_pem = ca_cert.pem();

        Ok(Self {
            ca_cert_pem,
            ca_key_pair: key_pair,
            ca_cert,
        })
    }

    /// Load a CA previously created by [`ClusterCA::new`] with the same
    /// common name. Certificates issued afterwards chain to `cert_pem`.
    pub fn from_pem(common_name: &str, cert_pem: &str, key_pem: &str) -> anyhow::Result<Self> {
        let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("invalid CA certificate PEM: {}", e))?;
        if certs.is_empty() {
            bail!("CA certificate PEM for {} holds no certificate", common_name);
        }
        let key_pair = KeyPair::from_pem(key_pem)?;
        // Only the subject and key identifier of the signing certificate end
        // up in issued certificates; both are reproduced from the same inputs.
        let ca_cert = ca_params(common_name).self_signed(&key_pair)?;
        Ok(Self {
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pair: key_pair,
            ca_cert,
        })
    }

    /// Issue a certificate signed by this CA.
    pub fn issue(&self, request: &CertRequest) -> anyhow::Result<IssuedCert> {
        debug!(
            "Issuing certificate for {} ({} dns names, {} ips)",
            request.common_name,
            request.dns_names.len(),
            request.ips.len()
        );

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, request.common_name.as_str());
        params.is_ca = IsCa::NoCa;
        for name in &request.dns_names {
            params
                .subject_alt_names
                .push(SanType::DnsName(name.as_str().try_into()?));
        }
        for ip in &request.ips {
            let addr: IpAddr = ip
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid IP address in certificate request: {}", ip))?;
            params.subject_alt_names.push(SanType::IpAddress(addr));
        }
        for usage in &request.key_usages {
            match usage.to_ascii_lowercase().as_str() {
                "digital signature" => params.key_usages.push(KeyUsagePurpose::DigitalSignature),
                "key encipherment" => params.key_usages.push(KeyUsagePurpose::KeyEncipherment),
                "server auth" => params
                    .extended_key_usages
                    .push(ExtendedKeyUsagePurpose::ServerAuth),
                "client auth" => params
                    .extended_key_usages
                    .push(ExtendedKeyUsagePurpose::ClientAuth),
                other => bail!("unsupported key usage '{}'", other),
            }
        }

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key_pair)?;

        Ok(IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            ca_pem: self.ca_cert_pem.clone(),
        })
    }

    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    pub fn ca_key_pem(&self) -> String {
        self.ca_key_pair.serialize_pem()
    }
}
