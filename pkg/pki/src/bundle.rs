//! Packing of per-host certificate material into size-bounded secrets.

use std::collections::BTreeMap;

/// Name of the `index`-th bundle secret for one service cert of a NodeSet.
pub fn bundle_secret_name(node_set: &str, service: &str, cert_key: &str, index: usize) -> String {
    format!("{}-{}-{}-certs-{}", node_set, service, cert_key, index)
}

/// Split `certs` into bundles of at most `max_size` bytes.
///
/// Keys are `<host>-ca.crt`, `<host>-tls.crt` and `<host>-tls.key`; sorted,
/// each host's three entries are adjacent. Groups of three are appended to
/// the current bundle until the next group would push it past `max_size`,
/// at which point a new bundle starts. A key counts toward the size along
/// with its value. Only the sorted key sequence decides membership, so the
/// same input always yields the same bundles. A single group larger than
/// `max_size` still gets a bundle of its own.
pub fn pack_cert_bundles(
    certs: &BTreeMap<String, String>,
    max_size: usize,
) -> Vec<BTreeMap<String, String>> {
    let entries: Vec<(&String, &String)> = certs.iter().collect();
    let mut bundles: Vec<BTreeMap<String, String>> = Vec::new();
    let mut total = 0usize;

    for group in entries.chunks(3) {
        let size: usize = group.iter().map(|(k, v)| k.len() + v.len()).sum();
        if bundles.is_empty() || total + size > max_size {
            bundles.push(BTreeMap::new());
            total = 0;
        }
        total += size;
        if let Some(current) = bundles.last_mut() {
            for (k, v) in group {
                current.insert((*k).clone(), (*v).clone());
            }
        }
    }
    bundles
}
