use super::compile::CompiledNode;
use super::filter::Condition;
use crate::core::Value;
use crate::metadata::EntityMapping;

/// Renders compiled filters as SQL text for the query log. Nothing executes
/// this text; it shows what the in-memory evaluation does.
pub(crate) struct SqlRenderer {
    inline_params: bool,
    params: Vec<Value>,
    aliases: usize,
}

impl SqlRenderer {
    pub fn new(inline_params: bool) -> Self {
        Self {
            inline_params,
            params: Vec::new(),
            aliases: 0,
        }
    }

    pub fn next_alias(&mut self, prefix: &str) -> String {
        let alias = format!("{}{}", prefix, self.aliases);
        self.aliases += 1;
        alias
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

    fn literal(&mut self, value: &Value) -> String {
        if self.inline_params {
            value.to_string()
        } else {
            self.params.push(value.clone());
            "?".to_string()
        }
    }

    pub fn column(mapping: &EntityMapping, alias: &str, index: usize) -> String {
        let name = &mapping.schema().schema().columns()[index].name;
        format!("{}.\"{}\"", alias, name)
    }

    pub fn node(&mut self, mapping: &EntityMapping, alias: &str, node: &CompiledNode) -> String {
        match node {
            CompiledNode::Compare { column, condition } => {
                let column = Self::column(mapping, alias, *column);
                self.condition(&column, condition)
            }
            CompiledNode::Exists(predicate) => predicate.render(self, mapping, alias),
            CompiledNode::All(nodes) => self.junction(mapping, alias, nodes, " and ", "1 = 1"),
            CompiledNode::Any(nodes) => self.junction(mapping, alias, nodes, " or ", "1 = 0"),
        }
    }

    fn junction(
        &mut self,
        mapping: &EntityMapping,
        alias: &str,
        nodes: &[CompiledNode],
        separator: &str,
        empty: &str,
    ) -> String {
        match nodes {
            [] => empty.to_string(),
            [single] => self.node(mapping, alias, single),
            many => many
                .iter()
                .map(|n| match n {
                    CompiledNode::All(_) | CompiledNode::Any(_) => {
                        format!("({})", self.node(mapping, alias, n))
                    }
                    _ => self.node(mapping, alias, n),
                })
                .collect::<Vec<_>>()
                .join(separator),
        }
    }

    fn condition(&mut self, column: &str, condition: &Condition) -> String {
        match condition {
            Condition::Eq(v) if v.is_null() => format!("{} is null", column),
            Condition::Ne(v) if v.is_null() => format!("{} is not null", column),
            Condition::In(values) if values.is_empty() => "1 = 0".to_string(),
            Condition::Nin(values) if values.is_empty() => "1 = 1".to_string(),
            Condition::In(values) | Condition::Nin(values) => {
                let list = values
                    .iter()
                    .map(|v| self.literal(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} {} ({})", column, condition.operator(), list)
            }
            Condition::Eq(v)
            | Condition::Ne(v)
            | Condition::Gt(v)
            | Condition::Gte(v)
            | Condition::Lt(v)
            | Condition::Lte(v) => {
                let literal = self.literal(v);
                format!("{} {} {}", column, condition.operator(), literal)
            }
        }
    }
}
