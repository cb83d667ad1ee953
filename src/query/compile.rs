use super::existence::{OwnerKeys, RelationExistencePredicate};
use super::filter::{CollectionOperator, Condition, Filter, FilterNode};
use super::render::SqlRenderer;
use crate::core::{DataType, DbError, Result, Row, Value};
use crate::metadata::{EntityMapping, FieldRef, MetadataRegistry};
use crate::storage::ReadView;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) enum CompiledNode {
    Compare {
        column: usize,
        condition: Condition,
    },
    Exists(Box<RelationExistencePredicate>),
    All(Vec<CompiledNode>),
    Any(Vec<CompiledNode>),
}

/// Row-set state of a node once its existence predicates are evaluated.
enum PreparedNode<'a> {
    Compare {
        column: usize,
        condition: &'a Condition,
    },
    Exists {
        keys: OwnerKeys,
    },
    All(Vec<PreparedNode<'a>>),
    Any(Vec<PreparedNode<'a>>),
}

impl PreparedNode<'_> {
    fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Compare { column, condition } => condition_holds(condition, &row[*column]),
            Self::Exists { keys } => keys.admits(&row[0]),
            Self::All(nodes) => nodes.iter().all(|n| n.matches(row)),
            Self::Any(nodes) => nodes.iter().any(|n| n.matches(row)),
        }
    }
}

/// SQL semantics: comparisons against NULL never match, except through
/// `Eq(Null)`/`Ne(Null)`. Operands were coerced to the column type at
/// compile time, so structural ordering is the column ordering.
fn condition_holds(condition: &Condition, value: &Value) -> bool {
    match condition {
        Condition::Eq(expected) if expected.is_null() => value.is_null(),
        Condition::Ne(expected) if expected.is_null() => !value.is_null(),
        _ if value.is_null() => false,
        Condition::Eq(expected) => value == expected,
        Condition::Ne(expected) => value != expected,
        Condition::Gt(bound) => value > bound,
        Condition::Gte(bound) => value >= bound,
        Condition::Lt(bound) => value < bound,
        Condition::Lte(bound) => value <= bound,
        Condition::In(values) => values.contains(value),
        Condition::Nin(values) => !values.contains(value),
    }
}

/// A filter resolved against one entity's metadata.
///
/// Compilation does every field, relation and literal check, so a compiled
/// filter only fails at evaluation time if storage itself fails.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    mapping: Arc<EntityMapping>,
    root: CompiledNode,
}

impl CompiledFilter {
    pub fn compile(registry: &MetadataRegistry, entity: &str, filter: &Filter) -> Result<Self> {
        let mapping = registry.entity(entity)?;
        let root = compile_filter(registry, &mapping, filter)?;
        Ok(Self { mapping, root })
    }

    pub(crate) fn from_parts(mapping: Arc<EntityMapping>, root: CompiledNode) -> Self {
        Self { mapping, root }
    }

    pub fn entity(&self) -> &EntityMapping {
        &self.mapping
    }

    pub(crate) fn root(&self) -> &CompiledNode {
        &self.root
    }

    /// Every table the evaluation reads, for a consistent `ReadView`.
    pub fn tables(&self) -> BTreeSet<String> {
        let mut tables = BTreeSet::new();
        self.collect_tables(&mut tables);
        tables
    }

    pub(crate) fn collect_tables(&self, tables: &mut BTreeSet<String>) {
        tables.insert(self.mapping.table_name().to_string());
        collect_node_tables(&self.root, tables);
    }

    /// Rows of the entity's table that satisfy the filter, in storage
    /// order. Each row appears at most once.
    pub fn select<'v>(&self, view: &'v ReadView) -> Result<Vec<&'v Row>> {
        let table = view.table(self.mapping.table_name())?;
        let prepared = prepare(&self.root, view)?;
        Ok(table.rows().filter(|row| prepared.matches(row)).collect())
    }

    /// Primary keys of the selected rows.
    pub fn select_keys(&self, view: &ReadView) -> Result<BTreeSet<Value>> {
        Ok(self
            .select(view)?
            .into_iter()
            .map(|row| self.mapping.key_of_row(row))
            .collect())
    }

    /// SQL-like rendering for query logging.
    pub fn render(&self, projection: &str, inline_params: bool) -> (String, Vec<Value>) {
        let mut renderer = SqlRenderer::new(inline_params);
        let alias = renderer.next_alias("e");
        let condition = renderer.node(&self.mapping, &alias, &self.root);
        let sql = format!(
            "select {} from \"{}\" as {} where {}",
            projection.replace("{alias}", &alias),
            self.mapping.table_name(),
            alias,
            condition
        );
        (sql, renderer.into_params())
    }
}

fn collect_node_tables(node: &CompiledNode, tables: &mut BTreeSet<String>) {
    match node {
        CompiledNode::Compare { .. } => {}
        CompiledNode::Exists(predicate) => predicate.collect_tables(tables),
        CompiledNode::All(nodes) | CompiledNode::Any(nodes) => {
            for node in nodes {
                collect_node_tables(node, tables);
            }
        }
    }
}

fn prepare<'a>(node: &'a CompiledNode, view: &ReadView) -> Result<PreparedNode<'a>> {
    Ok(match node {
        CompiledNode::Compare { column, condition } => PreparedNode::Compare {
            column: *column,
            condition,
        },
        CompiledNode::Exists(predicate) => PreparedNode::Exists {
            keys: predicate.owner_keys(view)?,
        },
        CompiledNode::All(nodes) => {
            PreparedNode::All(nodes.iter().map(|n| prepare(n, view)).collect::<Result<_>>()?)
        }
        CompiledNode::Any(nodes) => {
            PreparedNode::Any(nodes.iter().map(|n| prepare(n, view)).collect::<Result<_>>()?)
        }
    })
}

pub(crate) fn compile_filter(
    registry: &MetadataRegistry,
    mapping: &EntityMapping,
    filter: &Filter,
) -> Result<CompiledNode> {
    let nodes = filter
        .nodes()
        .iter()
        .map(|node| compile_node(registry, mapping, node))
        .collect::<Result<Vec<_>>>()?;
    Ok(CompiledNode::All(nodes))
}

fn compile_node(registry: &MetadataRegistry, mapping: &EntityMapping, node: &FilterNode) -> Result<CompiledNode> {
    match node {
        FilterNode::Field { field, condition } => compile_field(registry, mapping, field, condition),
        FilterNode::Relation {
            relation,
            operator,
            filter,
        } => RelationExistencePredicate::compile(registry, mapping.name(), relation, *operator, filter)
            .map(|p| CompiledNode::Exists(Box::new(p))),
        FilterNode::And(filters) => Ok(CompiledNode::All(
            filters
                .iter()
                .map(|f| compile_filter(registry, mapping, f))
                .collect::<Result<_>>()?,
        )),
        FilterNode::Or(filters) => {
            if filters.is_empty() {
                return Err(DbError::ValidationError("'$or' needs at least one filter".into()));
            }
            Ok(CompiledNode::Any(
                filters
                    .iter()
                    .map(|f| compile_filter(registry, mapping, f))
                    .collect::<Result<_>>()?,
            ))
        }
    }
}

fn compile_field(
    registry: &MetadataRegistry,
    mapping: &EntityMapping,
    field: &str,
    condition: &Condition,
) -> Result<CompiledNode> {
    match mapping.metadata().field(field) {
        Some(FieldRef::PrimaryKey(prop)) | Some(FieldRef::Property(prop)) => {
            let column = mapping.column_index(field).ok_or_else(|| {
                DbError::ValidationError(format!("'{}.{}' has no column", mapping.name(), field))
            })?;
            let condition = coerce_condition(mapping.name(), field, &prop.data_type, condition)?;
            Ok(CompiledNode::Compare { column, condition })
        }
        Some(FieldRef::Relation(relation)) => {
            // `{labels: 1}` / `{labels: {$in: [1, 2]}}` compare the related primary key
            let target = registry.entity(&relation.target)?;
            let pk = target.metadata().primary_key_property().name.clone();
            let filter = Filter::new().condition(pk, condition.clone());
            RelationExistencePredicate::compile(registry, mapping.name(), field, CollectionOperator::Some, &filter)
                .map(|p| CompiledNode::Exists(Box::new(p)))
        }
        Some(FieldRef::Embedded(_)) => Err(DbError::ValidationError(format!(
            "Embedded property '{}.{}' cannot be filtered",
            mapping.name(),
            field
        ))),
        None => Err(DbError::ValidationError(format!(
            "'{}' has no field '{}'",
            mapping.name(),
            field
        ))),
    }
}

fn coerce_condition(entity: &str, field: &str, data_type: &DataType, condition: &Condition) -> Result<Condition> {
    let coerce = |value: &Value| -> Result<Value> {
        if value.is_null() {
            return Err(DbError::ValidationError(format!(
                "'{}.{}' cannot be compared with null using this operator",
                entity, field
            )));
        }
        data_type.coerce(value.clone()).map_err(|_| {
            DbError::ValidationError(format!(
                "{} cannot be used as {} for '{}.{}'",
                value, data_type, entity, field
            ))
        })
    };
    let coerce_all = |values: &[Value]| values.iter().map(coerce).collect::<Result<Vec<_>>>();

    Ok(match condition {
        Condition::Eq(v) if v.is_null() => Condition::Eq(Value::Null),
        Condition::Ne(v) if v.is_null() => Condition::Ne(Value::Null),
        Condition::Eq(v) => Condition::Eq(coerce(v)?),
        Condition::Ne(v) => Condition::Ne(coerce(v)?),
        Condition::Gt(v) => Condition::Gt(coerce(v)?),
        Condition::Gte(v) => Condition::Gte(coerce(v)?),
        Condition::Lt(v) => Condition::Lt(coerce(v)?),
        Condition::Lte(v) => Condition::Lte(coerce(v)?),
        Condition::In(vs) => Condition::In(coerce_all(vs)?),
        Condition::Nin(vs) => Condition::Nin(coerce_all(vs)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntityMetadata;

    fn registry() -> MetadataRegistry {
        MetadataRegistry::build(vec![
            EntityMetadata::new("Book")
                .property("title", DataType::Text)
                .nullable_property("pages", DataType::Integer)
                .nullable_property("price", DataType::Float),
        ])
        .unwrap()
    }

    #[test]
    fn test_condition_semantics() {
        assert!(condition_holds(&Condition::Eq(Value::Null), &Value::Null));
        assert!(!condition_holds(&Condition::Ne(Value::Integer(1)), &Value::Null));
        assert!(condition_holds(&Condition::Gt(Value::Integer(1)), &Value::Integer(2)));
        assert!(condition_holds(
            &Condition::Nin(vec![Value::Integer(1)]),
            &Value::Integer(2)
        ));
        assert!(!condition_holds(&Condition::Lt(Value::Integer(1)), &Value::Null));
    }

    #[test]
    fn test_literals_coerced_to_column_type() {
        let compiled = CompiledFilter::compile(&registry(), "Book", &Filter::new().gt("price", 10)).unwrap();
        match compiled.root() {
            CompiledNode::All(nodes) => match &nodes[0] {
                CompiledNode::Compare { condition, .. } => {
                    assert_eq!(condition, &Condition::Gt(Value::Float(10.0)))
                }
                other => panic!("unexpected node {:?}", other),
            },
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_compile_errors() {
        let registry = registry();
        for filter in [
            Filter::new().eq("author", "x"),
            Filter::new().eq("pages", "many"),
            Filter::new().gt("pages", Value::Null),
            Filter::new().some("tags", Filter::new()),
            Filter::new().or(vec![]),
        ] {
            assert!(matches!(
                CompiledFilter::compile(&registry, "Book", &filter),
                Err(DbError::ValidationError(_))
            ));
        }
        assert!(CompiledFilter::compile(&registry, "Author", &Filter::new()).is_err());
    }

    #[test]
    fn test_render_inlines_params_on_request() {
        let registry = registry();
        let compiled = CompiledFilter::compile(&registry, "Book", &Filter::new().eq("title", "Dune")).unwrap();

        let (sql, params) = compiled.render("count(*)", false);
        assert_eq!(sql, "select count(*) from \"book\" as e0 where e0.\"title\" = ?");
        assert_eq!(params, vec![Value::from("Dune")]);

        let (sql, params) = compiled.render("count(*)", true);
        assert_eq!(sql, "select count(*) from \"book\" as e0 where e0.\"title\" = 'Dune'");
        assert!(params.is_empty());
    }
}
