/// Many-to-many collection filter tests
///
/// `$some`, `$none` and `$every` over owning and inverse collections,
/// through both `count` and `find`.
/// Run with: cargo test --test relation_existence_tests

use memorm::metadata::{EntityMetadata, ManyToManyMetadata};
use memorm::query::Filter;
use memorm::{
    DataType, DbError, EntityFields, EntityKey, EntityStore, Orm, OrmConfig, Result, Value,
};
use serde_json::json;

async fn setup() -> Result<Orm> {
    let config = OrmConfig::new()
        .db_name("labels")
        .entity(
            EntityMetadata::new("User")
                .property("name", DataType::Text)
                .many_to_many(ManyToManyMetadata::owner("labels", "UserLabel").inversed_by("users")),
        )
        .entity(
            EntityMetadata::new("UserLabel")
                .property("name", DataType::Text)
                .many_to_many(ManyToManyMetadata::inverse("users", "User", "labels")),
        );
    Orm::init(config).await
}

/// Labels 1 (red) and 2 (blue); user 1 has both, user 2 has red.
async fn seed(orm: &Orm) -> Result<()> {
    let mut em = orm.em()?;
    em.create("UserLabel", EntityFields::new().set("id", 1).set("name", "red"))
        .await?;
    em.create("UserLabel", EntityFields::new().set("id", 2).set("name", "blue"))
        .await?;
    em.create(
        "User",
        EntityFields::new().set("id", 1).set("name", "ann").relate("labels", [1, 2]),
    )
    .await?;
    em.create(
        "User",
        EntityFields::new().set("id", 2).set("name", "bob").relate("labels", [1]),
    )
    .await?;
    em.flush().await
}

fn label_id(id: i64) -> Filter {
    Filter::new().some("labels", Filter::new().eq("id", id))
}

#[tokio::test]
async fn test_some_counts_distinct_owners() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let em = orm.em()?;

    assert_eq!(em.count("User", &label_id(1)).await?, 2);
    assert_eq!(em.count("User", &label_id(2)).await?, 1);
    assert_eq!(em.count("User", &label_id(3)).await?, 0);

    // both labels match, user 1 still counts once
    let any_label = Filter::new().some("labels", Filter::new().is_in("id", [1, 2]));
    assert_eq!(em.count("User", &any_label).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_adding_same_pair_twice_stores_one_join_row() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    assert_eq!(orm.storage().row_count("user_labels").await?, 3);

    let mut em = orm.em()?;
    let bob = em.find_one_or_fail("User", 2.into()).await?;
    {
        let mut labels = em.collection(&bob, "labels")?;
        labels.add_key(1)?;
        labels.add_key(1)?;
    }
    em.flush().await?;

    assert_eq!(orm.storage().row_count("user_labels").await?, 3);
    assert_eq!(em.count("User", &label_id(1)).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_non_matching_label_does_not_change_count() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;

    let mut em = orm.em()?;
    let red = Filter::new().some("labels", Filter::new().eq("name", "red"));
    let before = em.count("User", &red).await?;

    let green = em
        .create("UserLabel", EntityFields::new().set("id", 3).set("name", "green"))
        .await?;
    let bob = em.find_one_or_fail("User", 2.into()).await?;
    em.collection(&bob, "labels")?.add(&green)?;
    em.flush().await?;

    assert_eq!(em.count("User", &red).await?, before);
    assert_eq!(em.count("User", &label_id(3)).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_find_returns_the_rows_count_counts() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let mut em = orm.em()?;

    for id in 1..=3 {
        let filter = label_id(id);
        let found = em.find("User", &filter).await?;
        assert_eq!(found.len(), em.count("User", &filter).await?);
    }

    let found = em.find("User", &label_id(2)).await?;
    assert_eq!(found[0].key()?, EntityKey::Integer(1));
    assert_eq!(found[0].get("name")?, Value::from("ann"));
    Ok(())
}

#[tokio::test]
async fn test_none_and_every() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let mut em = orm.em()?;
    em.create("User", EntityFields::new().set("id", 3).set("name", "cy"))
        .await?;
    em.flush().await?;

    let blue = Filter::new().eq("name", "blue");
    let red = Filter::new().eq("name", "red");

    // bob and cy have no blue label
    assert_eq!(em.count("User", &Filter::new().none("labels", blue)).await?, 2);
    // bob has only red labels, cy has none at all
    let every_red = Filter::new().every("labels", red);
    assert_eq!(em.count("User", &every_red).await?, 2);
    let keys: Vec<EntityKey> = em
        .find("User", &every_red)
        .await?
        .iter()
        .map(|u| u.key())
        .collect::<Result<_>>()?;
    assert_eq!(keys, vec![EntityKey::Integer(2), EntityKey::Integer(3)]);
    Ok(())
}

#[tokio::test]
async fn test_inverse_side_uses_the_same_join_table() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let mut em = orm.em()?;

    let by_ann = Filter::new().some("users", Filter::new().eq("name", "ann"));
    assert_eq!(em.count("UserLabel", &by_ann).await?, 2);
    let by_bob = Filter::new().some("users", Filter::new().eq("name", "bob"));
    assert_eq!(em.count("UserLabel", &by_bob).await?, 1);

    // linking from the inverse side lands in the owning join table
    let blue = em.find_one_or_fail("UserLabel", 2.into()).await?;
    em.collection(&blue, "users")?.add_key(2)?;
    em.flush().await?;

    assert_eq!(orm.storage().row_count("user_labels").await?, 4);
    assert_eq!(em.count("User", &label_id(2)).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_filters_from_json() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let em = orm.em()?;

    let explicit = Filter::from_json(&json!({ "labels": { "$some": { "id": 1 } } }))?;
    assert_eq!(em.count("User", &explicit).await?, 2);

    let shorthand = Filter::from_json(&json!({ "labels": { "id": 2 } }))?;
    assert_eq!(em.count("User", &shorthand).await?, 1);

    let combined = Filter::from_json(&json!({
        "$or": [
            { "labels": { "$some": { "name": "blue" } } },
            { "name": { "$eq": "bob" } }
        ]
    }))?;
    assert_eq!(em.count("User", &combined).await?, 2);

    let none = Filter::from_json(&json!({ "labels": { "$none": { "name": { "$in": ["red", "blue"] } } } }))?;
    assert_eq!(em.count("User", &none).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_filters_are_rejected_before_storage() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let mut em = orm.em()?;

    let unknown_relation = Filter::new().some("tags", Filter::new().eq("id", 1));
    assert!(matches!(
        em.count("User", &unknown_relation).await,
        Err(DbError::ValidationError(_))
    ));

    let unknown_field = Filter::new().some("labels", Filter::new().eq("colour", "red"));
    assert!(matches!(
        em.find("User", &unknown_field).await,
        Err(DbError::ValidationError(_))
    ));

    let wrong_type = Filter::new().some("labels", Filter::new().eq("id", "one"));
    assert!(matches!(
        em.count("User", &wrong_type).await,
        Err(DbError::ValidationError(_))
    ));

    assert!(matches!(
        Filter::from_json(&json!({ "labels": { "$any": { "id": 1 } } })),
        Err(DbError::ValidationError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_counts_ignore_unflushed_links() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let mut em = orm.em()?;

    let bob = em.find_one_or_fail("User", 2.into()).await?;
    em.collection(&bob, "labels")?.add_key(2)?;
    assert_eq!(em.count("User", &label_id(2)).await?, 1);

    em.flush().await?;
    assert_eq!(em.count("User", &label_id(2)).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_load_collection_merges_pending_changes() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let mut em = orm.em()?;

    let ann = em.find_one_or_fail("User", 1.into()).await?;
    assert!(!ann.is_collection_initialized("labels")?);

    let labels = em.load_collection(&ann, "labels").await?;
    assert_eq!(labels.len(), 2);
    assert_eq!(em.collection(&ann, "labels")?.len()?, 2);

    em.collection(&ann, "labels")?.remove_key(1)?;
    assert_eq!(ann.collection_keys("labels")?, vec![EntityKey::Integer(2)]);

    let bob = em.find_one_or_fail("User", 2.into()).await?;
    let reloaded = em.load_collection(&bob, "labels").await?;
    assert_eq!(reloaded.len(), 1);
    assert!(reloaded[0].same_entity(&labels[0]));

    em.flush().await?;
    assert_eq!(em.count("User", &label_id(1)).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_removing_an_entity_deletes_its_join_rows() -> Result<()> {
    let orm = setup().await?;
    seed(&orm).await?;
    let mut em = orm.em()?;

    let red = em.find_one_or_fail("UserLabel", 1.into()).await?;
    em.remove(&red)?;
    em.flush().await?;

    assert_eq!(orm.storage().row_count("user_labels").await?, 1);
    assert_eq!(em.count("User", &label_id(1)).await?, 0);
    assert!(matches!(
        em.find_one_or_fail("UserLabel", 1.into()).await,
        Err(DbError::NotFound { .. })
    ));
    Ok(())
}
