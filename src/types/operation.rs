//! Query and write operation names.
//!
//! Both enums serialize as the flat camelCase strings used in cache keys and
//! request paths (e.g. `"findMany"`, `"createManyAndReturn"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::MuninnError;

/// Read operation a cached query was created with.
///
/// `Procedure(String)` covers custom procedures exposed next to the generated
/// CRUD surface. Their results are opaque to the optimistic applier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryOperation {
    FindUnique,
    FindFirst,
    FindMany,
    Count,
    Aggregate,
    GroupBy,
    Exists,
    /// Custom procedure not in the well-known set.
    Procedure(String),
}

impl QueryOperation {
    /// Canonical string representation as stored in cache keys.
    pub fn as_str(&self) -> &str {
        match self {
            Self::FindUnique => "findUnique",
            Self::FindFirst => "findFirst",
            Self::FindMany => "findMany",
            Self::Count => "count",
            Self::Aggregate => "aggregate",
            Self::GroupBy => "groupBy",
            Self::Exists => "exists",
            Self::Procedure(s) => s.as_str(),
        }
    }

    /// `findUnique`, `findFirst` and `findMany`: results made of model rows.
    pub fn is_find(&self) -> bool {
        matches!(self, Self::FindUnique | Self::FindFirst | Self::FindMany)
    }

    /// Whether the result is a single row (or `null`).
    pub fn is_single(&self) -> bool {
        matches!(self, Self::FindUnique | Self::FindFirst)
    }
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryOperation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "findUnique" => Self::FindUnique,
            "findFirst" => Self::FindFirst,
            "findMany" => Self::FindMany,
            "count" => Self::Count,
            "aggregate" => Self::Aggregate,
            "groupBy" => Self::GroupBy,
            "exists" => Self::Exists,
            other => Self::Procedure(other.to_string()),
        })
    }
}

impl From<&str> for QueryOperation {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(op) => op,
            Err(never) => match never {},
        }
    }
}

impl Serialize for QueryOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for QueryOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(QueryOperation::from(s.as_str()))
    }
}

/// Write operation of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteOperation {
    Create,
    CreateMany,
    CreateManyAndReturn,
    Update,
    UpdateMany,
    UpdateManyAndReturn,
    Upsert,
    Delete,
    DeleteMany,
}

impl WriteOperation {
    /// All write operations, in declaration order.
    pub const ALL: [WriteOperation; 9] = [
        Self::Create,
        Self::CreateMany,
        Self::CreateManyAndReturn,
        Self::Update,
        Self::UpdateMany,
        Self::UpdateManyAndReturn,
        Self::Upsert,
        Self::Delete,
        Self::DeleteMany,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::CreateMany => "createMany",
            Self::CreateManyAndReturn => "createManyAndReturn",
            Self::Update => "update",
            Self::UpdateMany => "updateMany",
            Self::UpdateManyAndReturn => "updateManyAndReturn",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::DeleteMany => "deleteMany",
        }
    }

    /// The `*Many` batch forms.
    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            Self::CreateMany
                | Self::CreateManyAndReturn
                | Self::UpdateMany
                | Self::UpdateManyAndReturn
                | Self::DeleteMany
        )
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::CreateMany | Self::CreateManyAndReturn
        )
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete | Self::DeleteMany)
    }
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteOperation {
    type Err = MuninnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| MuninnError::UnknownOperation(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_operation_round_trips_known_names() {
        for name in [
            "findUnique",
            "findFirst",
            "findMany",
            "count",
            "aggregate",
            "groupBy",
            "exists",
        ] {
            let op: QueryOperation = name.parse().unwrap();
            assert_eq!(op.as_str(), name);
            assert!(!matches!(op, QueryOperation::Procedure(_)));
        }
    }

    #[test]
    fn unknown_query_operation_is_procedure() {
        let op = QueryOperation::from("listActiveUsers");
        assert_eq!(op, QueryOperation::Procedure("listActiveUsers".into()));
        assert_eq!(op.to_string(), "listActiveUsers");
    }

    #[test]
    fn write_operation_parse_rejects_reads() {
        let err = "findMany".parse::<WriteOperation>().unwrap_err();
        assert!(matches!(err, MuninnError::UnknownOperation(ref s) if s == "findMany"));
    }

    #[test]
    fn write_operation_serde_uses_camel_case() {
        let json = serde_json::to_string(&WriteOperation::UpdateManyAndReturn).unwrap();
        assert_eq!(json, "\"updateManyAndReturn\"");
        let back: WriteOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WriteOperation::UpdateManyAndReturn);
    }

    #[test]
    fn batch_classification() {
        assert!(WriteOperation::CreateMany.is_batch());
        assert!(WriteOperation::DeleteMany.is_batch());
        assert!(!WriteOperation::Upsert.is_batch());
        assert!(WriteOperation::CreateManyAndReturn.is_create());
        assert!(!WriteOperation::Upsert.is_create());
    }
}
