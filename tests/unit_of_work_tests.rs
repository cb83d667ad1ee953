/// Entity manager lifecycle tests
///
/// Identity map, flush atomicity, clear/detach and lookups by key.
/// Run with: cargo test --test unit_of_work_tests

use memorm::metadata::{EntityMetadata, ManyToManyMetadata};
use memorm::query::Filter;
use memorm::{
    DataType, DbError, EntityFields, EntityKey, EntityState, EntityStore, FindOptions, Order, Orm,
    OrmConfig, Result, Value,
};

async fn setup() -> Result<Orm> {
    let config = OrmConfig::new()
        .db_name("library")
        .entity(
            EntityMetadata::new("Book")
                .property("title", DataType::Text)
                .nullable_property("pages", DataType::Integer)
                .many_to_many(ManyToManyMetadata::owner("tags", "Tag")),
        )
        .entity(
            EntityMetadata::new("Tag")
                .primary_key("code", DataType::Text)
                .property("name", DataType::Text),
        );
    Orm::init(config).await
}

fn book(id: i64, title: &str) -> EntityFields {
    EntityFields::new().set("id", id).set("title", title)
}

#[tokio::test]
async fn test_identity_map_returns_one_handle_per_key() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    let created = em.create("Book", book(1, "Dune")).await?;
    assert_eq!(created.state()?, EntityState::Managed);
    em.flush().await?;
    assert_eq!(created.state()?, EntityState::Persisted);

    let found = em.find_one_or_fail("Book", 1.into()).await?;
    assert!(found.same_entity(&created));
    let listed = em.find("Book", &Filter::new()).await?;
    assert!(listed[0].same_entity(&created));

    // another manager hydrates its own handle
    let mut other = orm.em()?;
    let foreign = other.find_one_or_fail("Book", 1.into()).await?;
    assert!(!foreign.same_entity(&created));
    assert!(other.is_managed(&foreign));
    assert!(!other.is_managed(&created));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_key_in_one_manager_is_rejected() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    em.create("Book", book(1, "Dune")).await?;
    assert!(matches!(
        em.create("Book", book(1, "Emma")).await,
        Err(DbError::ValidationError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_failed_flush_changes_nothing() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    em.create("Tag", EntityFields::new().set("code", "sf").set("name", "Sci-fi"))
        .await?;
    let dune = em
        .create("Book", book(1, "Dune").relate("tags", ["sf", "missing"]))
        .await?;

    assert!(matches!(
        em.flush().await,
        Err(DbError::ConstraintViolation(_))
    ));
    assert_eq!(orm.storage().row_count("book").await?, 0);
    assert_eq!(orm.storage().row_count("tag").await?, 0);
    assert_eq!(orm.storage().row_count("book_tags").await?, 0);
    assert_eq!(dune.state()?, EntityState::Managed);

    // dropping the bad link lets the same unit of work go through
    em.collection(&dune, "tags")?.remove_key("missing")?;
    em.flush().await?;
    assert_eq!(orm.storage().row_count("book").await?, 1);
    assert_eq!(orm.storage().row_count("book_tags").await?, 1);
    assert_eq!(dune.state()?, EntityState::Persisted);
    Ok(())
}

#[tokio::test]
async fn test_clear_detaches_handles() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    let dune = em.create("Book", book(1, "Dune")).await?;
    em.flush().await?;

    em.clear();
    assert_eq!(dune.state()?, EntityState::Detached);
    assert!(matches!(dune.get("title"), Err(DbError::DetachedEntity(_))));
    assert!(matches!(dune.set("title", "x"), Err(DbError::DetachedEntity(_))));
    assert!(matches!(em.remove(&dune), Err(DbError::DetachedEntity(_))));

    let fresh = em.find_one_or_fail("Book", 1.into()).await?;
    assert!(!fresh.same_entity(&dune));
    assert_eq!(fresh.get("title")?, Value::from("Dune"));
    Ok(())
}

#[tokio::test]
async fn test_clear_discards_pending_changes() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    em.create("Book", book(1, "Dune")).await?;
    em.clear();
    em.flush().await?;
    assert_eq!(orm.storage().row_count("book").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_find_one_or_fail() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    assert!(matches!(
        em.find_one_or_fail("Book", 9.into()).await,
        Err(DbError::NotFound { .. })
    ));
    assert!(matches!(
        em.find_one_or_fail("Book", "nine".into()).await,
        Err(DbError::ValidationError(_))
    ));
    assert!(matches!(
        em.find_one_or_fail("Shelf", 1.into()).await,
        Err(DbError::ValidationError(_))
    ));

    em.create("Tag", EntityFields::new().set("code", "sf").set("name", "Sci-fi"))
        .await?;
    em.flush().await?;
    let tag = em.find_one_or_fail("Tag", "sf".into()).await?;
    assert_eq!(tag.key()?, EntityKey::Text("sf".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_updates_and_removals_are_flushed() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    em.create("Book", book(1, "Dune")).await?;
    em.create("Book", book(2, "Emma")).await?;
    em.flush().await?;

    let dune = em.find_one_or_fail("Book", 1.into()).await?;
    dune.set("pages", 412)?;
    let emma = em.find_one_or_fail("Book", 2.into()).await?;
    em.remove(&emma)?;
    assert_eq!(emma.state()?, EntityState::Removed);

    // pending changes are invisible to reads
    assert_eq!(em.count("Book", &Filter::new()).await?, 2);
    em.flush().await?;
    assert_eq!(emma.state()?, EntityState::Detached);

    let mut other = orm.em()?;
    let reloaded = other.find_one_or_fail("Book", 1.into()).await?;
    assert_eq!(reloaded.get("pages")?, Value::Integer(412));
    assert_eq!(other.count("Book", &Filter::new()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_removing_a_pending_entity_cancels_its_insert() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    let dune = em.create("Book", book(1, "Dune")).await?;
    em.remove(&dune)?;
    assert_eq!(dune.state()?, EntityState::Detached);
    em.flush().await?;
    assert_eq!(orm.storage().row_count("book").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_removed_entity_cannot_be_persisted_again() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    em.create("Tag", EntityFields::new().set("code", "sf").set("name", "Sci-fi"))
        .await?;
    em.create("Book", book(1, "Dune").relate("tags", ["sf"])).await?;
    em.flush().await?;

    let tag = em.find_one_or_fail("Tag", "sf".into()).await?;
    em.remove(&tag)?;
    assert!(matches!(em.persist(&tag), Err(DbError::ValidationError(_))));
    assert_eq!(tag.state()?, EntityState::Removed);

    em.flush().await?;
    assert_eq!(tag.state()?, EntityState::Detached);
    assert_eq!(orm.storage().row_count("tag").await?, 0);
    assert_eq!(orm.storage().row_count("book_tags").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_closed_orm_rejects_forks() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    em.create("Book", book(1, "Dune")).await?;
    orm.close();

    assert!(matches!(em.fork(), Err(DbError::ConfigError(_))));
    // managers obtained before close keep working
    em.flush().await?;
    assert_eq!(em.count("Book", &Filter::new()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_find_with_order_and_paging() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    for (id, title, pages) in [(1, "Dune", 412), (2, "Emma", 474), (3, "Ubik", 202)] {
        em.create("Book", book(id, title).set("pages", pages)).await?;
    }
    em.flush().await?;

    let options = FindOptions::new().order_by("pages", Order::Desc).offset(1).limit(1);
    let page = em.find_with("Book", &Filter::new(), &options).await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].get("title")?, Value::from("Dune"));

    let short = em.find_one("Book", &Filter::new().lt("pages", 300)).await?;
    assert_eq!(short.map(|b| b.key()).transpose()?, Some(EntityKey::Integer(3)));

    let bad = FindOptions::new().order_by("tags", Order::Asc);
    assert!(matches!(
        em.find_with("Book", &Filter::new(), &bad).await,
        Err(DbError::ValidationError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_forked_manager_has_its_own_identity_map() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    let dune = em.create("Book", book(1, "Dune")).await?;
    em.flush().await?;

    let mut fork = em.fork()?;
    assert_ne!(fork.id(), em.id());
    let copy = fork.find_one_or_fail("Book", 1.into()).await?;
    assert!(!copy.same_entity(&dune));

    copy.set("title", "Dune Messiah")?;
    fork.flush().await?;
    assert_eq!(dune.get("title")?, Value::from("Dune"));
    assert_eq!(
        em.count("Book", &Filter::new().eq("title", "Dune Messiah")).await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_refresh_database_empties_every_table() -> Result<()> {
    let orm = setup().await?;
    let mut em = orm.em()?;
    em.create("Tag", EntityFields::new().set("code", "sf").set("name", "Sci-fi"))
        .await?;
    em.create("Book", book(1, "Dune").relate("tags", ["sf"])).await?;
    em.flush().await?;

    orm.schema().refresh_database().await?;
    assert_eq!(orm.storage().row_count("book").await?, 0);
    assert_eq!(orm.storage().row_count("book_tags").await?, 0);
    assert_eq!(em.count("Book", &Filter::new()).await?, 0);
    Ok(())
}
