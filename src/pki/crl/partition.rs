use tracing::{debug, warn};
use url::Url;

use super::types::NO_CRL_PARTITION;

/// Placeholder replaced by the partition number in URI templates
pub const PARTITION_TOKEN: &str = "*";

/// Separator between several URIs in one template
const URI_SEPARATOR: char = ';';

/// Partition specific distribution URIs for one CRL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionUris {
    /// Carried in the Issuing Distribution Point extension
    pub distribution_points: Vec<String>,
    /// Carried in the Freshest CRL extension
    pub freshest_crl: Vec<String>,
}

/// Compute the distribution point and freshest CRL URIs of a partition.
///
/// The legacy partition gets the templates with the token removed, so CRLs for
/// certificates issued before partitioning keep their original location.
pub fn derive_extensions(
    dp_template: &str,
    freshest_template: &str,
    partition_index: u32,
) -> Result<PartitionUris, String> {
    let uris = PartitionUris {
        distribution_points: expand_template(dp_template, partition_index)?,
        freshest_crl: expand_template(freshest_template, partition_index)?,
    };

    debug!(
        "Partition {} distribution points: {:?}, freshest CRL: {:?}",
        partition_index, uris.distribution_points, uris.freshest_crl
    );
    Ok(uris)
}

/// Substitute the partition token in a single URI
pub fn substitute_partition(uri: &str, partition_index: u32) -> String {
    if partition_index == NO_CRL_PARTITION {
        uri.replace(PARTITION_TOKEN, "")
    } else {
        uri.replace(PARTITION_TOKEN, &partition_index.to_string())
    }
}

fn expand_template(template: &str, partition_index: u32) -> Result<Vec<String>, String> {
    template
        .split(URI_SEPARATOR)
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(|uri| {
            let uri = substitute_partition(uri, partition_index);
            if is_valid_distribution_uri(&uri) {
                Ok(uri)
            } else {
                warn!("Rejecting distribution point URI: {}", uri);
                Err(format!("invalid distribution point URI: {uri}"))
            }
        })
        .collect()
}

/// Validate that a URI can be published as a CRL location
fn is_valid_distribution_uri(uri: &str) -> bool {
    let Ok(parsed) = Url::parse(uri) else {
        return false;
    };

    match parsed.scheme() {
        "http" | "https" => parsed.host().is_some(),
        // ldap:///cn=... is valid and resolves against the default directory
        "ldap" | "ldaps" => true,
        _ => false,
    }
}
