use std::sync::Arc;

use consistent_cache::codec::Entity;
use consistent_cache::error::CacheError;
use consistent_cache::error::CodecError;
use consistent_cache::error::KeyError;
use consistent_cache::error::StoreError;
use consistent_cache::item::ItemTag;
use consistent_cache::memory::MemoryCache;
use consistent_cache::memory::MemoryStore;
use consistent_cache::test::test_cache;
use consistent_cache::test::CounterEntity;
use consistent_cache::test::HookedCache;
use consistent_cache::test::HookedStore;
use consistent_cache::test::TestEntity;
use consistent_cache::types::KeyResult;
use consistent_cache::Cache;
use consistent_cache::Error;
use consistent_cache::Key;

#[tokio::test]
async fn read_after_write() -> Result<(), Box<dyn std::error::Error>> {
    let (cache, _, _) = test_cache();
    let key = Key::name("Entity", "answer");

    cache.put(&key, &TestEntity::new(1)).await?;
    assert_eq!(cache.get::<TestEntity>(&key).await?, TestEntity::new(1));
    // Twice, so the second read comes from the cache.
    assert_eq!(cache.get::<TestEntity>(&key).await?, TestEntity::new(1));

    cache.put(&key, &TestEntity::new(2)).await?;
    assert_eq!(cache.get::<TestEntity>(&key).await?, TestEntity::new(2));

    Ok(())
}

#[tokio::test]
async fn incomplete_keys_get_completed() -> Result<(), Box<dyn std::error::Error>> {
    let (cache, store, _) = test_cache();
    let parent = Key::name("Parent", "p").with_namespace("tenant");
    let keys = vec![
        Key::incomplete("Entity").with_parent(parent.clone()),
        Key::incomplete("Entity").with_parent(parent.clone()),
    ];

    let written = cache
        .put_multi(&keys, &[TestEntity::new(10), TestEntity::new(20)])
        .await?
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    assert!(written.iter().all(|k| k.is_complete()));
    assert_ne!(written[0], written[1]);
    assert_eq!(written[0].parent(), Some(&parent));
    assert_eq!(written[0].namespace(), "tenant");
    assert_eq!(store.inner().len(), 2);

    assert_eq!(cache.get::<TestEntity>(&written[1]).await?, TestEntity::new(20));

    Ok(())
}

#[tokio::test]
async fn writes_invalidate_after_the_store() -> Result<(), Box<dyn std::error::Error>> {
    let (cache, store, hooks) = test_cache();
    let keys = vec![Key::int("Entity", 1), Key::int("Entity", 2)];
    cache.put_multi(&keys, &[TestEntity::new(1), TestEntity::new(2)]).await?;
    cache.get_multi::<TestEntity>(&keys).await?;

    hooks.fail_sets(true);
    let err = cache
        .put_multi(&keys, &[TestEntity::new(3), TestEntity::new(4)])
        .await
        .unwrap_err();
    match err {
        Error::Invalidation { stale, written, source } => {
            assert_eq!(stale, keys);
            assert_eq!(written, vec![Ok(keys[0].clone()), Ok(keys[1].clone())]);
            assert!(matches!(source, CacheError::Unavailable(_)));
        }
        other => panic!("expected an invalidation error, got {other}"),
    }

    // The backing store took the write regardless.
    let stored = store.inner().entity(&keys[1]).ok_or("entity missing")?;
    assert_eq!(TestEntity::load(stored)?, TestEntity::new(4));

    hooks.fail_sets(false);
    Ok(())
}

#[tokio::test]
async fn failed_invalidation_keeps_write_outcomes() -> Result<(), Box<dyn std::error::Error>> {
    let (cache, store, hooks) = test_cache();
    let keys = vec![Key::incomplete("Entity"), Key::int("Entity", 5)];
    store.fail_key(keys[1].clone());
    hooks.fail_sets(true);

    let err = cache
        .put_multi(&keys, &[TestEntity::new(1), TestEntity::new(2)])
        .await
        .unwrap_err();
    let (stale, written) = match err {
        Error::Invalidation { stale, written, .. } => (stale, written),
        other => panic!("expected an invalidation error, got {other}"),
    };
    assert_eq!(written.len(), 2);
    let completed = written[0].clone()?;
    assert!(completed.is_complete());
    assert_eq!(completed.kind(), "Entity");
    assert!(matches!(written[1], Err(KeyError::Store(StoreError::Backend(_)))));
    assert_eq!(stale, vec![completed.clone()]);

    // The completed key is the only handle to the new record.
    let stored = store.inner().entity(&completed).ok_or("entity missing")?;
    assert_eq!(TestEntity::load(stored)?, TestEntity::new(1));

    let err = cache.delete_multi(&[completed.clone(), keys[1].clone()]).await.unwrap_err();
    match err {
        Error::Invalidation { stale, written, .. } => {
            assert_eq!(stale, vec![completed.clone()]);
            assert_eq!(written[0], Ok(completed.clone()));
            assert!(matches!(written[1], Err(KeyError::Store(_))));
        }
        other => panic!("expected an invalidation error, got {other}"),
    }
    assert!(store.inner().entity(&completed).is_none());

    hooks.fail_sets(false);
    Ok(())
}

#[tokio::test]
async fn unsavable_entities_fail_alone() -> Result<(), Box<dyn std::error::Error>> {
    let (cache, store, hooks) = test_cache();
    let keys = vec![Key::int("Counter", 1), Key::int("Counter", 2)];
    cache.put_multi(&keys, &[CounterEntity::new(1), CounterEntity::new(2)]).await?;
    cache.get_multi::<CounterEntity>(&keys).await?;

    // u64::MAX has no integer property representation, so its save fails before the store is reached.
    let results = cache
        .put_multi(&keys, &[CounterEntity::new(u64::MAX), CounterEntity::new(3)])
        .await?;
    assert!(matches!(results[0], Err(KeyError::Codec(CodecError::Unsupported(_)))), "{results:?}");
    assert_eq!(results[1], Ok(keys[1].clone()));

    let first = hooks.inner().get(&keys[0].cache_key(cache.key_prefix())).await;
    let second = hooks.inner().get(&keys[1].cache_key(cache.key_prefix())).await;
    assert_eq!(first.and_then(|i| i.tag()), Some(ItemTag::Entity), "untouched by the failed save");
    assert_eq!(second.and_then(|i| i.tag()), Some(ItemTag::Locked));

    let stored = store.inner().entity(&keys[0]).ok_or("entity missing")?;
    assert_eq!(CounterEntity::load(stored)?, CounterEntity::new(1));

    let results = cache.get_multi::<CounterEntity>(&keys).await?;
    assert_eq!(
        results,
        vec![KeyResult::Found(CounterEntity::new(1)), KeyResult::Found(CounterEntity::new(3))]
    );

    Ok(())
}

#[tokio::test]
async fn failed_store_writes_are_not_invalidated() -> Result<(), Box<dyn std::error::Error>> {
    let (cache, store, hooks) = test_cache();
    let keys = vec![Key::int("Entity", 1), Key::int("Entity", 2)];
    cache.put_multi(&keys, &[TestEntity::new(1), TestEntity::new(2)]).await?;
    cache.get_multi::<TestEntity>(&keys).await?;

    store.fail_key(keys[0].clone());
    let results = cache.put_multi(&keys, &[TestEntity::new(5), TestEntity::new(6)]).await?;
    assert!(matches!(results[0], Err(KeyError::Store(StoreError::Backend(_)))));
    assert_eq!(results[1], Ok(keys[1].clone()));

    let first = hooks.inner().get(&keys[0].cache_key(cache.key_prefix())).await;
    assert_eq!(first.and_then(|i| i.tag()), Some(ItemTag::Entity), "untouched by the failed write");
    store.heal_key(&keys[0]);

    let results = cache.get_multi::<TestEntity>(&keys).await?;
    assert_eq!(results, vec![KeyResult::Found(TestEntity::new(1)), KeyResult::Found(TestEntity::new(6))]);

    Ok(())
}

#[tokio::test]
async fn delete_then_read() -> Result<(), Box<dyn std::error::Error>> {
    let (cache, _, _) = test_cache();
    let key = Key::int("Entity", 7);

    cache.put(&key, &TestEntity::new(7)).await?;
    assert_eq!(cache.get::<TestEntity>(&key).await?, TestEntity::new(7));

    cache.delete(&key).await?;
    let err = cache.get::<TestEntity>(&key).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    Ok(())
}

#[tokio::test]
async fn write_argument_errors() {
    let (cache, store, hooks) = test_cache();

    let err = cache
        .put_multi(&[Key::int("Entity", 1)], &[TestEntity::new(1), TestEntity::new(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LengthMismatch { keys: 1, values: 2 }), "{err}");

    let err = cache.put(&Key::incomplete(""), &TestEntity::new(1)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidKey { .. }), "{err}");

    let err = cache.delete(&Key::incomplete("Entity")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidKey { .. }), "{err}");

    assert_eq!(store.write_calls() + store.delete_calls(), 0);
    assert_eq!(hooks.set_calls(), 0);
}

#[tokio::test]
async fn large_batches_are_chunked() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(HookedStore::new(MemoryStore::new()));
    let hooks = Arc::new(HookedCache::new(MemoryCache::default()));
    let cache = Cache::builder()
        .store(Arc::clone(&store))
        .cache(Arc::clone(&hooks))
        .max_batch_size(3)
        .build()?;

    let keys = (1..=7).map(|id| Key::int("Entity", id)).collect::<Vec<_>>();
    let entities = (1..=7).map(TestEntity::new).collect::<Vec<_>>();
    cache.put_multi(&keys, &entities).await?;
    assert_eq!(store.write_calls(), 3);
    assert_eq!(hooks.set_calls(), 3);

    let results = cache.get_multi::<TestEntity>(&keys).await?;
    let expected = entities.into_iter().map(KeyResult::Found).collect::<Vec<_>>();
    assert_eq!(results, expected);
    assert_eq!(store.read_calls(), 3);

    Ok(())
}
