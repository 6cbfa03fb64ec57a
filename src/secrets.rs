//! Secret resolution for driver RPCs (spec §4.7).
//!
//! Class parameters may reference a secret via the CSI convention keys
//! (`csi.storage.k8s.io/{op}-secret-name` / `-namespace`), whose values
//! may themselves contain `${snapshotcontent.name}` /
//! `${volumesnapshot.name}` / `${volumesnapshot.namespace}` templates.
//! Resolution happens immediately before each driver call so a rotated
//! secret takes effect without restarting the controller.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};

use crate::error::{Error, Result};

/// Which driver operation the secret is being resolved for. Upstream's
/// contract historically diverged here (spec §9 open question); we
/// model all three explicitly and fall back to the base
/// `snapshotter-secret-*` pair when an operation-specific pair is absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretOp {
    Create,
    Delete,
    List,
}

impl SecretOp {
    fn key_prefix(self) -> &'static str {
        match self {
            SecretOp::Create => "csi.storage.k8s.io/snapshotter-secret",
            SecretOp::Delete => "csi.storage.k8s.io/snapshotter-delete-secret",
            SecretOp::List => "csi.storage.k8s.io/snapshotter-list-secret",
        }
    }

    fn fallback_prefix(self) -> &'static str {
        "csi.storage.k8s.io/snapshotter-secret"
    }
}

/// Fields available for `${...}` expansion in a secret name/namespace.
#[derive(Clone, Debug, Default)]
pub struct TemplateContext<'a> {
    pub snapshotcontent_name: &'a str,
    pub volumesnapshot_name: &'a str,
    pub volumesnapshot_namespace: &'a str,
}

impl<'a> TemplateContext<'a> {
    fn expand(&self, template: &str) -> String {
        template
            .replace("${snapshotcontent.name}", self.snapshotcontent_name)
            .replace("${volumesnapshot.name}", self.volumesnapshot_name)
            .replace("${volumesnapshot.namespace}", self.volumesnapshot_namespace)
    }
}

/// A resolved `(name, namespace)` pointing at the secret to fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

/// Look up the secret reference named by `op`'s convention keys in
/// `parameters`, expanding any `${...}` templates. Returns `None` if the
/// class carries no secret parameters for this operation (the driver
/// call is then made with empty secrets).
pub fn secret_ref(
    parameters: &BTreeMap<String, String>,
    op: SecretOp,
    ctx: &TemplateContext,
) -> Option<SecretRef> {
    let (name_key, ns_key) = (format!("{}-name", op.key_prefix()), format!("{}-namespace", op.key_prefix()));
    let (fallback_name_key, fallback_ns_key) = (
        format!("{}-name", op.fallback_prefix()),
        format!("{}-namespace", op.fallback_prefix()),
    );

    let name = parameters
        .get(&name_key)
        .or_else(|| parameters.get(&fallback_name_key))?;
    let namespace = parameters
        .get(&ns_key)
        .or_else(|| parameters.get(&fallback_ns_key))?;

    Some(SecretRef {
        name: ctx.expand(name),
        namespace: ctx.expand(namespace),
    })
}

/// Fetch a secret's string-decodable data immediately before the driver
/// call. Binary values are lost (the CSI wire contract takes
/// string-keyed string-valued maps); this mirrors the real driver ABI.
pub async fn fetch_secret_data(client: &Client, secret_ref: &SecretRef) -> Result<BTreeMap<String, String>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &secret_ref.namespace);
    let secret = api
        .get(&secret_ref.name)
        .await
        .map_err(|e| Error::from_kube_get(e, &secret_ref.name))?;

    let mut out = BTreeMap::new();
    if let Some(data) = secret.data {
        for (k, v) in data {
            if let Ok(s) = String::from_utf8(v.0) {
                out.insert(k, s);
            }
        }
    }
    if let Some(string_data) = secret.string_data {
        out.extend(string_data);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn resolves_operation_specific_pair() {
        let p = params(&[
            ("csi.storage.k8s.io/snapshotter-delete-secret-name", "del-secret"),
            ("csi.storage.k8s.io/snapshotter-delete-secret-namespace", "ns1"),
        ]);
        let ctx = TemplateContext::default();
        let r = secret_ref(&p, SecretOp::Delete, &ctx).unwrap();
        assert_eq!(r.name, "del-secret");
        assert_eq!(r.namespace, "ns1");
    }

    #[test]
    fn falls_back_to_base_pair() {
        let p = params(&[
            ("csi.storage.k8s.io/snapshotter-secret-name", "base-secret"),
            ("csi.storage.k8s.io/snapshotter-secret-namespace", "ns1"),
        ]);
        let ctx = TemplateContext::default();
        let r = secret_ref(&p, SecretOp::List, &ctx).unwrap();
        assert_eq!(r.name, "base-secret");
    }

    #[test]
    fn expands_templates() {
        let p = params(&[
            ("csi.storage.k8s.io/snapshotter-secret-name", "secret-${volumesnapshot.name}"),
            ("csi.storage.k8s.io/snapshotter-secret-namespace", "${volumesnapshot.namespace}"),
        ]);
        let ctx = TemplateContext {
            snapshotcontent_name: "snapcontent-U1",
            volumesnapshot_name: "s1",
            volumesnapshot_namespace: "ns",
        };
        let r = secret_ref(&p, SecretOp::Create, &ctx).unwrap();
        assert_eq!(r.name, "secret-s1");
        assert_eq!(r.namespace, "ns");
    }

    #[test]
    fn absent_parameters_yield_none() {
        let p = params(&[]);
        let ctx = TemplateContext::default();
        assert!(secret_ref(&p, SecretOp::Create, &ctx).is_none());
    }
}
