use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// A namespaced identifier, printed as `v2e::<source>::<kind>::<id>`.
///
/// `::` is the only delimiter and no segment may be empty; `parse` and
/// `Display` round-trip for every well-formed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Urn {
    source: String,
    kind: String,
    id: String,
}

impl Urn {
    pub fn new(
        source: impl Into<String>,
        kind: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let urn = Urn {
            source: source.into(),
            kind: kind.into(),
            id: id.into(),
        };
        urn.validate()?;
        Ok(urn)
    }

    fn validate(&self) -> Result<(), CoreError> {
        for (name, segment) in [
            ("source", &self.source),
            ("kind", &self.kind),
            ("id", &self.id),
        ] {
            if segment.is_empty() {
                return Err(CoreError::invalid_argument(format!(
                    "urn {name} segment must not be empty"
                )));
            }
            if segment.contains("::") {
                return Err(CoreError::invalid_argument(format!(
                    "urn {name} segment must not contain '::'"
                )));
            }
        }
        Ok(())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v2e::{}::{}::{}", self.source, self.kind, self.id)
    }
}

impl FromStr for Urn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split("::");
        let prefix = parts
            .next()
            .ok_or_else(|| CoreError::invalid_argument("empty urn"))?;
        if prefix != "v2e" {
            return Err(CoreError::invalid_argument(format!(
                "urn must start with 'v2e::', got {s:?}"
            )));
        }
        let source = parts
            .next()
            .ok_or_else(|| CoreError::invalid_argument("urn missing source segment"))?;
        let kind = parts
            .next()
            .ok_or_else(|| CoreError::invalid_argument("urn missing kind segment"))?;
        let id = parts
            .next()
            .ok_or_else(|| CoreError::invalid_argument("urn missing id segment"))?;
        if parts.next().is_some() {
            return Err(CoreError::invalid_argument(format!(
                "urn has too many segments: {s:?}"
            )));
        }
        Urn::new(source, kind, id)
    }
}
