//! Capability catalog of the Management API.
//!
//! Built once on first use and shared read-only afterwards.

use reconcile::{
    CapabilityDescriptor, CapabilityRegistry, IdComponent, IdShape, MissingPolicy, Verb,
};
use std::sync::LazyLock;

static REGISTRY: LazyLock<CapabilityRegistry> = LazyLock::new(build);

/// The process-wide registry.
pub fn registry() -> &'static CapabilityRegistry {
    &REGISTRY
}

const CREDENTIAL_SECRETS: [&str; 2] = ["credentials.private_key", "credentials.private_key_id"];
const GCS_SECRETS: [&str; 2] = [
    "gcs_credentials.private_key",
    "gcs_credentials.private_key_id",
];

fn build() -> CapabilityRegistry {
    use Verb::{Create, Delete, Import, Read, Update};

    CapabilityRegistry::new()
        .register(CapabilityDescriptor::new("maintainer"))
        .register(CapabilityDescriptor::new("organization").immutable(["maintainer_id"]))
        .register(
            CapabilityDescriptor::new("project")
                .immutable(["organization_id", "type"])
                .secret_once(["storage_token"]),
        )
        .register(
            CapabilityDescriptor::new("project-token")
                .verbs([Create, Delete, Import])
                .immutable([
                    "project_id",
                    "description",
                    "can_manage_buckets",
                    "can_read_all_file_uploads",
                    "can_purge_trash",
                    "expires_in",
                    "bucket_permissions",
                    "component_access",
                    "token",
                ])
                .secret_once(["token"]),
        )
        .register(
            CapabilityDescriptor::new("project-invitation")
                .verbs([Create, Read, Delete, Import])
                .immutable(["project_id", "email"])
                .computed(["status"])
                .on_missing(MissingPolicy::AlreadyConsumed),
        )
        .register(
            CapabilityDescriptor::new("project-feature")
                .verbs([Create, Read, Delete, Import])
                .immutable(["project_id", "feature"])
                .id_shape(IdShape::composite(vec![
                    IdComponent::numeric().mirrors("project_id"),
                    IdComponent::text().mirrors("feature"),
                ])),
        )
        .register(
            CapabilityDescriptor::new("backend")
                .immutable(["backend"])
                .sensitive(["password"]),
        )
        .register(
            CapabilityDescriptor::new("bigquery-backend")
                .verbs([Create, Update])
                .sensitive(CREDENTIAL_SECRETS),
        )
        .register(
            CapabilityDescriptor::new("file-storage-s3")
                .verbs([Create, Read, Import])
                .sensitive(["aws_secret"]),
        )
        .register(
            CapabilityDescriptor::new("file-storage-gcs")
                .verbs([Create, Read, Import])
                .sensitive(GCS_SECRETS),
        )
        .register(
            CapabilityDescriptor::new("file-storage-azure-blob")
                .verbs([Create, Read, Import])
                .sensitive(["account_key"]),
        )
}
