//! Shared Kubernetes helpers using kube-rs
//!
//! Client construction, per-call deadlines, status merge-patches and
//! server-side apply of untyped child resources.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::debug;

use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for a single API call issued from a reconciliation pass
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts.
///
/// Without a path the configuration is inferred (in-cluster service account,
/// then `$KUBECONFIG`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client> {
    let client_err = |what: &str, e: &dyn std::fmt::Display| {
        Error::internal_with_context("create_client", format!("{what}: {e}"))
    };

    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| client_err("failed to read kubeconfig", &e))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| client_err("failed to load kubeconfig", &e))?
        }
        None => Config::infer()
            .await
            .map_err(|e| client_err("failed to infer config", &e))?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| client_err("failed to create client", &e))
}

/// Run one API call under a deadline.
///
/// An elapsed deadline becomes [`Error::Timeout`] naming `operation`; API
/// errors become [`Error::Kube`].
pub async fn with_api_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::timeout(operation, timeout)),
    }
}

/// Whether a kube error is a 404
pub fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

/// Split `group/version` (or a bare core `version`) into its parts
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes kind.
///
/// Known runtime kinds use a lookup table; everything else falls back to
/// simple English rules.
pub fn pluralize_kind(kind: &str) -> String {
    const KIND_PLURALS: &[(&str, &str)] = &[
        ("rayservice", "rayservices"),
        ("dynamographdeployment", "dynamographdeployments"),
        ("workspace", "workspaces"),
        ("modeldeployment", "modeldeployments"),
        ("inferenceprovider", "inferenceproviders"),
    ];

    let lower = kind.to_lowercase();
    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(s, _)| *s == lower) {
        return (*plural).to_string();
    }
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{lower}s")
    }
}

/// Build an `ApiResource` from a known apiVersion and kind without discovery
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Merge-patch the status subresource of a namespaced object.
///
/// `patch` is the full body, e.g. `{"status": {...}}`. Fields absent from the
/// body are left untouched; explicit `null`s delete.
pub async fn patch_namespaced_status<K>(
    client: &Client,
    namespace: &str,
    name: &str,
    patch: &serde_json::Value,
    field_manager: &str,
) -> Result<()>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    with_api_timeout(
        &format!("patch status {namespace}/{name}"),
        DEFAULT_API_TIMEOUT,
        api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(patch)),
    )
    .await?;
    Ok(())
}

/// Merge-patch the status subresource of a cluster-scoped object
pub async fn patch_cluster_status<K>(
    client: &Client,
    name: &str,
    patch: &serde_json::Value,
    field_manager: &str,
) -> Result<()>
where
    K: kube::Resource<Scope = k8s_openapi::ClusterResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::all(client.clone());
    with_api_timeout(
        &format!("patch status {name}"),
        DEFAULT_API_TIMEOUT,
        api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(patch)),
    )
    .await?;
    Ok(())
}

/// Server-side apply a namespaced untyped object.
///
/// The object must carry `apiVersion`, `kind`, `metadata.name` and
/// `metadata.namespace`. Conflicts are forced so the field manager owns every
/// field it sets.
pub async fn apply_dynamic(
    client: &Client,
    object: &serde_json::Value,
    field_manager: &str,
) -> Result<DynamicObject> {
    let str_at = |ptr: &str| object.pointer(ptr).and_then(|v| v.as_str());
    let (Some(api_version), Some(kind), Some(name), Some(namespace)) = (
        str_at("/apiVersion"),
        str_at("/kind"),
        str_at("/metadata/name"),
        str_at("/metadata/namespace"),
    ) else {
        return Err(Error::serialization(
            "object to apply is missing apiVersion, kind, metadata.name or metadata.namespace",
        ));
    };

    let ar = build_api_resource(api_version, kind);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
    debug!(%kind, %namespace, %name, "Applying child resource");
    with_api_timeout(
        &format!("apply {kind} {namespace}/{name}"),
        DEFAULT_API_TIMEOUT,
        api.patch(
            name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(object),
        ),
    )
    .await
}
