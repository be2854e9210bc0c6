use pretty_assertions::assert_eq;
use proptest::prelude::*;
use slotmap::SlotMap;
use test_env_log::test;

use super::*;

fn keys(n: usize, hash: impl Fn(usize) -> u64) -> (SlotMap<ObjRef, ()>, Vec<Key>) {
    let mut map = SlotMap::with_key();
    let keys = (0..n)
        .map(|i| Key {
            obj: map.insert(()),
            hash: hash(i),
        })
        .collect();
    (map, keys)
}

#[test]
fn set_get_overwrite() {
    let (_map, keys) = keys(3, |i| i as u64 * 7919);
    let mut table = Table::new();

    assert!(table.set(keys[0], Val::Number(1.0)));
    assert!(table.set(keys[1], Val::Bool(false)));
    assert!(!table.set(keys[0], Val::Number(2.0)));

    assert_eq!(table.get(keys[0]), Some(Val::Number(2.0)));
    assert_eq!(table.get(keys[1]), Some(Val::Bool(false)));
    assert_eq!(table.get(keys[2]), None);
    assert_eq!(table.len(), 2);
}

#[test]
fn nil_values_are_present() {
    let (_map, keys) = keys(1, |_| 42);
    let mut table = Table::new();
    table.set(keys[0], Val::Nil);
    assert_eq!(table.get(keys[0]), Some(Val::Nil));
    assert!(table.contains(keys[0]));
}

#[test]
fn delete_leaves_tombstone_and_reset_is_new() {
    // all keys collide so they share one probe sequence
    let (_map, keys) = keys(3, |_| 5);
    let mut table = Table::new();
    for (i, &key) in keys.iter().enumerate() {
        table.set(key, Val::Number(i as f64));
    }

    assert!(table.delete(keys[1]));
    assert!(!table.delete(keys[1]));
    assert_eq!(table.get(keys[1]), None);
    assert_eq!(table.tombstones(), 1);
    assert_eq!(table.tombstone_slots(), 1);

    // the key behind the tombstone is still reachable
    assert_eq!(table.get(keys[2]), Some(Val::Number(2.0)));

    assert!(table.set(keys[1], Val::Number(10.0)));
    assert_eq!(table.get(keys[1]), Some(Val::Number(10.0)));
    assert_eq!(table.tombstones(), 0);
    assert_eq!(table.len(), 3);
}

#[test]
fn delete_from_empty_table() {
    let (_map, keys) = keys(1, |_| 0);
    let mut table = Table::new();
    assert!(!table.delete(keys[0]));
    assert_eq!(table.get(keys[0]), None);
}

#[test]
fn resize_keeps_entries_and_drops_tombstones() {
    let (_map, keys) = keys(64, |i| (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
    let mut table = Table::new();
    for (i, &key) in keys.iter().take(6).enumerate() {
        table.set(key, Val::Number(i as f64));
    }
    assert_eq!(table.capacity(), 8);
    table.delete(keys[0]);
    table.delete(keys[1]);
    assert_eq!(table.tombstones(), 2);

    for (i, &key) in keys.iter().enumerate().skip(6) {
        table.set(key, Val::Number(i as f64));
    }

    assert!(table.capacity().is_power_of_two());
    assert_eq!(table.tombstones(), 0);
    assert_eq!(table.tombstone_slots(), 0);
    assert_eq!(table.len(), 62);
    assert_eq!(table.get(keys[0]), None);
    assert_eq!(table.get(keys[1]), None);
    for (i, &key) in keys.iter().enumerate().skip(2) {
        assert_eq!(table.get(key), Some(Val::Number(i as f64)));
    }
}

#[test]
fn load_factor_is_kept() {
    let (_map, keys) = keys(100, |i| i as u64);
    let mut table = Table::new();
    for &key in &keys {
        table.set(key, Val::Nil);
        assert!(table.len() * 4 <= table.capacity() * 3);
    }
}

#[test]
fn small_table_scan_matches_probe() {
    // a key whose home slot is taken by a different key
    let (_map, keys) = keys(4, |i| if i < 2 { 3 } else { i as u64 });
    let mut table = Table::new();
    for (i, &key) in keys.iter().enumerate() {
        table.set(key, Val::Number(i as f64));
    }
    assert!(table.capacity() <= SMALL_TABLE_THRESHOLD);
    for (i, &key) in keys.iter().enumerate() {
        assert_eq!(table.get(key), Some(Val::Number(i as f64)));
    }
}

#[test]
fn find_string_compares_content() {
    let mut map = SlotMap::<ObjRef, &str>::with_key();
    let hash = 77;
    let a = map.insert("alpha");
    let b = map.insert("beta");
    let mut table = Table::new();
    table.set(Key { obj: a, hash }, Val::Nil);
    table.set(Key { obj: b, hash }, Val::Nil);

    let resolve = |r| map.get(r).copied();
    assert_eq!(table.find_string("beta", hash, resolve).map(|k| k.obj), Some(b));
    assert_eq!(table.find_string("alpha", hash, resolve).map(|k| k.obj), Some(a));
    assert_eq!(table.find_string("gamma", hash, resolve), None);
    // right content, wrong hash
    assert_eq!(table.find_string("alpha", hash + 1, resolve), None);

    table.delete(Key { obj: a, hash });
    assert_eq!(table.find_string("beta", hash, resolve).map(|k| k.obj), Some(b));
    assert_eq!(table.find_string("alpha", hash, resolve), None);
}

#[test]
fn remove_unmarked_tombstones_dead_keys() {
    let (_map, keys) = keys(5, |i| i as u64);
    let mut table = Table::new();
    for &key in &keys {
        table.set(key, Val::Nil);
    }
    let live = [keys[1].obj, keys[3].obj];
    let removed = table.remove_unmarked(|r| live.contains(&r));
    assert_eq!(removed, 3);
    assert_eq!(table.len(), 2);
    assert_eq!(table.tombstones(), 3);
    assert!(table.contains(keys[1]));
    assert!(table.contains(keys[3]));
    assert!(!table.contains(keys[0]));
}

#[test]
fn add_all_copies_entries() {
    let (_map, keys) = keys(3, |i| i as u64);
    let mut from = Table::new();
    let mut to = Table::new();
    from.set(keys[0], Val::Number(1.0));
    from.set(keys[1], Val::Number(2.0));
    to.set(keys[1], Val::Number(20.0));
    to.set(keys[2], Val::Number(30.0));

    from.add_all(&mut to);

    assert_eq!(to.get(keys[0]), Some(Val::Number(1.0)));
    assert_eq!(to.get(keys[1]), Some(Val::Number(2.0)));
    assert_eq!(to.get(keys[2]), Some(Val::Number(30.0)));
    assert_eq!(from.len(), 2);
}

#[derive(Debug, Clone)]
enum Op {
    Set(usize, i32),
    Delete(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..16usize, any::<i32>()).prop_map(|(k, v)| Op::Set(k, v)),
        (0..16usize).prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn behaves_like_a_map(ops in prop::collection::vec(op(), 0..200), collide in any::<bool>()) {
        let (_map, keys) = keys(16, |i| if collide { (i % 3) as u64 } else { i as u64 * 31 });
        let mut table = Table::new();
        let mut model = std::collections::HashMap::new();

        for op in ops {
            match op {
                Op::Set(k, v) => {
                    let is_new = table.set(keys[k], Val::Number(v as f64));
                    prop_assert_eq!(is_new, model.insert(k, v).is_none());
                }
                Op::Delete(k) => {
                    prop_assert_eq!(table.delete(keys[k]), model.remove(&k).is_some());
                }
            }
            prop_assert_eq!(table.len(), model.len());
        }

        for (k, &key) in keys.iter().enumerate() {
            prop_assert_eq!(table.get(key), model.get(&k).map(|&v| Val::Number(v as f64)));
        }
        prop_assert!(table.capacity() == 0 || table.capacity().is_power_of_two());
    }
}
