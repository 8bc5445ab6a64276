use crate::{LabelSelector, LabelSelectorRequirement};
use anyhow::{bail, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Clone, Debug, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: Option<BTreeSet<String>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects cluster-roles for aggregation. The result of `match_labels` and
/// `match_expressions` are ANDed.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    match_labels: Option<Map>,
    match_expressions: Option<Expressions>,
}

// === impl Selector ===

impl Selector {
    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels {
                if labels.0.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }

    pub fn match_labels(&self) -> Option<&Map> {
        self.match_labels.as_ref()
    }

    pub fn has_expressions(&self) -> bool {
        self.match_expressions
            .as_ref()
            .map(|exprs| !exprs.is_empty())
            .unwrap_or(false)
    }
}

impl TryFrom<LabelSelector> for Selector {
    type Error = anyhow::Error;

    fn try_from(selector: LabelSelector) -> Result<Self> {
        let match_expressions = selector
            .match_expressions
            .map(|exprs| {
                exprs
                    .into_iter()
                    .map(Expression::try_from)
                    .collect::<Result<Expressions>>()
            })
            .transpose()?;
        Ok(Self {
            match_labels: selector.match_labels,
            match_expressions,
        })
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            match_labels: Some(iter.into_iter().collect()),
            match_expressions: None,
        }
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === impl Labels ===

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === impl Expression ===

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match (self.operator, &self.key, self.values.as_ref()) {
            (Operator::In, key, Some(values)) => match labels.get(key) {
                Some(v) => values.contains(v),
                None => false,
            },
            (Operator::NotIn, key, Some(values)) => match labels.get(key) {
                Some(v) => !values.contains(v),
                None => true,
            },
            (Operator::Exists, key, None) => labels.contains_key(key),
            (Operator::DoesNotExist, key, None) => !labels.contains_key(key),
            (operator, key, values) => {
                tracing::warn!(?operator, %key, ?values, "illegal match expression");
                false
            }
        }
    }
}

impl TryFrom<LabelSelectorRequirement> for Expression {
    type Error = anyhow::Error;

    fn try_from(requirement: LabelSelectorRequirement) -> Result<Self> {
        let operator = match requirement.operator.as_str() {
            "In" => Operator::In,
            "NotIn" => Operator::NotIn,
            "Exists" => Operator::Exists,
            "DoesNotExist" => Operator::DoesNotExist,
            other => bail!("unknown label selector operator {:?}", other),
        };
        let values = match operator {
            Operator::In | Operator::NotIn => {
                Some(requirement.values.unwrap_or_default().into_iter().collect())
            }
            Operator::Exists | Operator::DoesNotExist => None,
        };
        Ok(Self {
            key: requirement.key,
            operator,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn matches_labels_and_expressions() {
        let labels = Labels::from_iter(vec![("team", "platform"), ("tier", "web")]);

        assert!(Selector::default().matches(&labels));
        assert!(Selector::from_iter(Some(("team", "platform"))).matches(&labels));
        assert!(!Selector::from_iter(Some(("team", "data"))).matches(&labels));

        let selector = Selector {
            match_labels: Some(Map::from([("team".to_string(), "platform".to_string())])),
            match_expressions: Some(vec![Expression {
                key: "tier".into(),
                operator: Operator::In,
                values: Some(Some("web".to_string()).into_iter().collect()),
            }]),
        };
        assert!(selector.matches(&labels));

        let selector = Selector {
            match_labels: None,
            match_expressions: Some(vec![Expression {
                key: "tier".into(),
                operator: Operator::NotIn,
                values: Some(Some("web".to_string()).into_iter().collect()),
            }]),
        };
        assert!(!selector.matches(&labels));
    }

    #[test]
    fn converts_from_label_selector() {
        let selector = LabelSelector {
            match_labels: Some(Map::from([(
                "rbac.example.com/aggregate-to-edit".to_string(),
                "true".to_string(),
            )])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "Exists".to_string(),
                values: None,
            }]),
        };
        let selector = Selector::try_from(selector).unwrap();
        let labels = Labels::from_iter(vec![
            ("rbac.example.com/aggregate-to-edit", "true"),
            ("tier", "web"),
        ]);
        assert!(selector.matches(&labels));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
        };
        assert!(Selector::try_from(selector).is_err());
    }
}
