//! Data sources - Read-only lookups against the remote system
//!
//! A data source never creates or changes anything. Its arguments are
//! validated like desired state, turned into a describe or list query, and
//! the results flattened into a typed output.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::mapper::to_attributes;
use crate::provider::{Payload, RemoteClient};
use crate::resource::ResourceIdentity;
use crate::schema::ResourceSchema;

/// Remote call a data source reads from
#[derive(Debug, Clone, PartialEq)]
pub enum DataQuery {
    /// Describe one object by identity
    Describe(ResourceIdentity),
    /// List objects matching a query (all pages)
    List(Payload),
}

pub trait DataSourceKind: Sized + Send + Sync + 'static {
    type Args: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;
    type Output: Serialize + DeserializeOwned + Clone + fmt::Debug + PartialEq + Send + Sync;

    /// Data source type name (e.g., "outposts_assets")
    const TYPE_NAME: &'static str;

    /// Field table; arguments are caller attributes, results are computed
    fn schema() -> &'static ResourceSchema;

    fn query(args: &Self::Args) -> DataQuery;

    /// Build the output from the arguments and every returned payload
    fn flatten(args: &Self::Args, results: &[Payload]) -> Self::Output;
}

/// Read a data source
///
/// An empty list result is a legitimate answer, not an error. A describe
/// query for a missing object fails with `Error::NotFound`.
pub async fn read_data_source<K, C>(client: &C, args: &K::Args) -> Result<K::Output, Error>
where
    K: DataSourceKind,
    C: RemoteClient + ?Sized,
{
    K::schema()
        .validate(&to_attributes(args))
        .map_err(Error::Validation)?;

    let results = match K::query(args) {
        DataQuery::Describe(identity) => {
            log::debug!("Reading {} {}", K::TYPE_NAME, identity);
            vec![client.describe(&identity).await?]
        }
        DataQuery::List(query) => {
            log::debug!("Listing {} with {}", K::TYPE_NAME, query);
            client.list(query).await?
        }
    };

    log::debug!("{} returned {} items", K::TYPE_NAME, results.len());
    Ok(K::flatten(args, &results))
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};
    use crate::testing::{Call, MemoryRemote};

    struct Names;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct NamesArgs {
        prefix: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct NamesOutput {
        prefix: String,
        names: Vec<String>,
    }

    static SCHEMA: LazyLock<ResourceSchema> = LazyLock::new(|| {
        ResourceSchema::new("names")
            .attribute(AttributeSchema::new("prefix", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("names", AttributeType::List(Box::new(AttributeType::String)))
                    .computed(),
            )
    });

    impl DataSourceKind for Names {
        type Args = NamesArgs;
        type Output = NamesOutput;

        const TYPE_NAME: &'static str = "names";

        fn schema() -> &'static ResourceSchema {
            &SCHEMA
        }

        fn query(args: &NamesArgs) -> DataQuery {
            DataQuery::List(json!({"Prefix": args.prefix}))
        }

        fn flatten(args: &NamesArgs, results: &[Payload]) -> NamesOutput {
            NamesOutput {
                prefix: args.prefix.clone(),
                names: results
                    .iter()
                    .filter_map(|r| r.get("Name").and_then(Payload::as_str))
                    .map(str::to_string)
                    .collect(),
            }
        }
    }

    struct One;

    impl DataSourceKind for One {
        type Args = NamesArgs;
        type Output = NamesOutput;

        const TYPE_NAME: &'static str = "one";

        fn schema() -> &'static ResourceSchema {
            &SCHEMA
        }

        fn query(args: &NamesArgs) -> DataQuery {
            DataQuery::Describe(ResourceIdentity::new(&args.prefix))
        }

        fn flatten(args: &NamesArgs, results: &[Payload]) -> NamesOutput {
            Names::flatten(args, results)
        }
    }

    fn args(prefix: &str) -> NamesArgs {
        NamesArgs {
            prefix: prefix.to_string(),
        }
    }

    #[tokio::test]
    async fn list_results_are_flattened() {
        let remote = MemoryRemote::new();
        remote.set_listing(vec![json!({"Name": "a"}), json!({"Name": "b"})]);

        let output = read_data_source::<Names, _>(&remote, &args("x")).await.unwrap();
        assert_eq!(output.names, vec!["a", "b"]);
        assert_eq!(remote.mutation_count(), 0);
    }

    #[tokio::test]
    async fn empty_list_is_not_an_error() {
        let remote = MemoryRemote::new();
        let output = read_data_source::<Names, _>(&remote, &args("x")).await.unwrap();
        assert!(output.names.is_empty());
    }

    #[tokio::test]
    async fn describe_of_missing_object_is_not_found() {
        let remote = MemoryRemote::new();
        let err = read_data_source::<One, _>(&remote, &args("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn describe_returns_single_item() {
        let remote = MemoryRemote::new();
        remote.insert("x", json!({"Name": "x"}));
        let output = read_data_source::<One, _>(&remote, &args("x")).await.unwrap();
        assert_eq!(output.names, vec!["x"]);
        assert_eq!(remote.call_count(Call::Describe), 1);
    }
}
