use pretty_assertions::assert_eq;
use test_env_log::test;

use super::*;
use crate::value::{Class, Closure, Function, Instance, Upvalue};

fn heap() -> Heap {
    Heap::new(&VmConfig::default())
}

fn stress_heap() -> Heap {
    Heap::new(&VmConfig::default().with_debug(DebugFlags::STRESS_GC | DebugFlags::LOG_GC))
}

#[test]
fn interning_is_idempotent() {
    let mut heap = heap();
    let a = heap.intern("hello", &());
    let b = heap.intern("hello", &());
    let c = heap.intern_owned(String::from("hello"), &());
    let d = heap.intern("world", &());

    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_ne!(a, d);
    assert_eq!(heap.object_count(), 2);
    assert_eq!(heap.interned_count(), 2);
    assert_eq!(heap.str(a), Some("hello"));
}

#[test]
fn unreachable_objects_are_freed() {
    let mut heap = heap();
    let kept = heap.intern("kept", &());
    let dropped = heap.intern("dropped", &());
    let before = heap.bytes_allocated();

    heap.collect(&kept);

    assert!(heap.contains(kept));
    assert!(!heap.contains(dropped));
    assert!(heap.bytes_allocated() < before);
    assert_eq!(heap.next_gc(), heap.bytes_allocated() * 2);
}

#[test]
fn dead_strings_leave_the_intern_table() {
    let mut heap = heap();
    let first = heap.intern("ephemeral", &());
    heap.collect(&());
    assert_eq!(heap.interned_count(), 0);

    // interning again must produce a fresh object, not the freed handle
    let second = heap.intern("ephemeral", &());
    assert_ne!(first, second);
    assert_eq!(heap.str(second), Some("ephemeral"));
}

#[test]
fn survivors_outlive_many_collections() {
    let mut heap = heap();
    let name = heap.intern("f", &());
    let func = heap.alloc(Obj::Function(Function::new(Some(name), 0)), &name);
    let upvalue = heap.alloc(Obj::Upvalue(Upvalue::Closed(Val::Number(1.0))), &func);
    let closure = heap.alloc(
        Obj::Closure(Closure {
            function: func,
            upvalues: vec![upvalue],
        }),
        &(&func, &upvalue),
    );

    for _ in 0..5 {
        heap.collect(&closure);
    }

    for r in [name, func, upvalue, closure] {
        assert!(heap.contains(r));
    }
    assert_eq!(heap.object_count(), 4);
}

#[test]
fn cycles_are_collected() {
    let mut heap = heap();
    let name = heap.intern("Node", &());
    let class = heap.alloc(
        Obj::Class(Class {
            name,
            methods: Table::new(),
        }),
        &name,
    );
    let a = heap.alloc(
        Obj::Instance(Instance {
            class,
            fields: Table::new(),
        }),
        &class,
    );
    let b = heap.alloc(
        Obj::Instance(Instance {
            class,
            fields: Table::new(),
        }),
        &(&class, &a),
    );
    let field = heap.intern("next", &vec![a, b, class]);
    let key = heap.key(Val::Obj(field)).expect("interned string");
    for (from, to) in [(a, b), (b, a)] {
        if let Some(instance) = heap[from].as_instance_mut() {
            instance.fields.set(key, Val::Obj(to));
        }
    }

    heap.collect(&a);
    for r in [name, class, a, b, field] {
        assert!(heap.contains(r));
    }

    heap.collect(&());
    assert_eq!(heap.object_count(), 0);
    assert_eq!(heap.bytes_allocated(), 0);
}

#[test]
fn closed_upvalue_keeps_its_value() {
    let mut heap = heap();
    let s = heap.intern("captured", &());
    let upvalue = heap.alloc(Obj::Upvalue(Upvalue::Closed(Val::Obj(s))), &s);

    heap.collect(&upvalue);
    assert!(heap.contains(s));

    heap[upvalue] = Obj::Upvalue(Upvalue::Open(0));
    heap.collect(&upvalue);
    assert!(!heap.contains(s));
}

#[test]
fn stress_mode_collects_on_every_allocation() {
    let mut heap = stress_heap();
    let a = heap.intern("a", &());
    let b = heap.intern("b", &a);
    assert_eq!(heap.collections(), 2);
    assert!(heap.contains(a));

    // nothing roots `b` when `c` is allocated
    let c = heap.intern("c", &a);
    assert!(!heap.contains(b));
    assert!(heap.contains(c));
}

#[test]
fn threshold_triggers_collection() {
    let config = VmConfig {
        initial_gc_threshold: 256,
        ..VmConfig::default()
    };
    let mut heap = Heap::new(&config);
    let kept = heap.intern("kept", &());
    let mut i = 0;
    while heap.collections() == 0 {
        heap.intern_owned(format!("garbage {}", i), &kept);
        i += 1;
    }
    assert!(heap.contains(kept));
    // earlier garbage is gone; only the string that triggered the collection is new
    assert_eq!(heap.object_count(), 2);
}

#[test]
fn chunk_constants_are_roots() {
    let mut heap = heap();
    let mut chunk = Chunk::<Val>::new();
    let s = heap.intern("constant", &chunk);
    chunk.add_constant(Val::Obj(s));
    heap.collect(&chunk);
    assert!(heap.contains(s));
}

#[test]
fn allocation_keeps_its_own_references() {
    let mut heap = stress_heap();
    let mut chunk = Chunk::<Val>::new();
    let s = heap.intern("only in the chunk", &chunk);
    chunk.add_constant(Val::Obj(s));

    // the chunk is owned by the function being allocated and is not a root
    let func = heap.alloc(Obj::Function(Function::script(chunk)), &());
    assert!(heap.contains(s));
    assert!(heap.contains(func));
}

#[test]
fn recharge_tracks_table_growth() {
    let mut heap = heap();
    let name = heap.intern("Point", &());
    let class = heap.alloc(
        Obj::Class(Class {
            name,
            methods: Table::new(),
        }),
        &name,
    );
    let before = heap.bytes_allocated();

    let mut roots = vec![name, class];
    for i in 0..20 {
        let s = heap.intern_owned(format!("m{}", i), &roots);
        roots.push(s);
        let key = heap.key(Val::Obj(s)).expect("interned string");
        if let Some(class) = heap[class].as_class_mut() {
            class.methods.set(key, Val::Nil);
        }
    }
    let strings = heap.bytes_allocated() - before;
    heap.recharge(class);

    assert!(heap.bytes_allocated() > before + strings);
    assert_eq!(heap.lookup("m7"), Some(roots[9]));
}
