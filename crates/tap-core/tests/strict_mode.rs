//! Development-only auditing. Only debug builds double-invoke, so every
//! test here is compiled for debug builds only.
#![cfg(debug_assertions)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tap_core::{
    create_resource, flush_resources_sync, on_cleanup, resource, tap_effect, tap_effect_with,
    tap_ref, tap_resource, tap_state, tap_state_with, ResourceOptions, StateSetter,
};

type Events = Rc<RefCell<Vec<String>>>;

fn strict() -> ResourceOptions {
    ResourceOptions {
        mount: true,
        dev_strict_mode: true,
    }
}

fn push(events: &Events, event: impl Into<String>) {
    events.borrow_mut().push(event.into());
}

fn take(events: &Events) -> Vec<String> {
    std::mem::take(&mut *events.borrow_mut())
}

#[test]
fn first_render_runs_twice() {
    let renders = Rc::new(Cell::new(0));
    let counter = {
        let renders = Rc::clone(&renders);
        resource(move |_: &()| {
            renders.set(renders.get() + 1);
            renders.get()
        })
    };

    let handle = create_resource(counter.unit(), strict()).expect("mount");
    assert_eq!(renders.get(), 2);
    assert_eq!(handle.get_value(), 2);

    let relaxed = create_resource(counter.unit(), ResourceOptions::default()).expect("mount");
    assert_eq!(renders.get(), 3);
    assert_eq!(relaxed.get_value(), 3);
}

#[test]
fn lazy_initializers_run_twice_on_first_render() {
    let init_calls = Rc::new(Cell::new(0));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let body = {
        let init_calls = Rc::clone(&init_calls);
        let seen = Rc::clone(&seen);
        resource(move |_: &()| {
            let counter = tap_ref(0);
            let next = || {
                init_calls.set(init_calls.get() + 1);
                counter.update(|value| {
                    *value += 1;
                    *value
                })
            };
            let (first, _) = tap_state_with(&next);
            let (second, _) = tap_state_with(&next);
            seen.borrow_mut().push((first, second, counter.get()));
        })
    };

    create_resource(body.unit(), strict()).expect("mount");
    assert_eq!(init_calls.get(), 4);
    assert_eq!(*seen.borrow(), vec![(1, 3, 4), (1, 3, 4)]);
}

#[test]
fn first_commit_mounts_unmounts_and_remounts_effects() {
    let events: Events = Rc::default();
    let body = {
        let events = Rc::clone(&events);
        resource(move |_: &()| {
            let renders = tap_ref(0);
            let count = renders.update(|value| {
                *value += 1;
                *value
            });

            for (index, deps) in [(1, None), (2, Some(0)), (3, Some(count))] {
                let events = Rc::clone(&events);
                let effect = move || {
                    push(&events, format!("mount-{index}"));
                    let events = Rc::clone(&events);
                    on_cleanup(move || push(&events, format!("unmount-{index}")))
                };
                match deps {
                    None => tap_effect(effect),
                    Some(deps) => tap_effect_with(deps, effect),
                }
            }
            count
        })
    };

    let handle = create_resource(body.unit(), strict()).expect("mount");
    assert_eq!(handle.get_value(), 2);
    assert_eq!(
        take(&events),
        vec![
            "mount-1",
            "mount-2",
            "mount-3",
            "unmount-1",
            "unmount-2",
            "unmount-3",
            "mount-1",
            "mount-2",
            "mount-3",
        ]
    );

    handle.unmount().expect("unmount");
    assert_eq!(take(&events), vec!["unmount-1", "unmount-2", "unmount-3"]);
}

#[test]
fn state_set_from_a_mount_effect_renders_twice() {
    let events: Events = Rc::default();
    let body = {
        let events = Rc::clone(&events);
        resource(move |_: &()| {
            let (count, set_count) = tap_state(0);
            push(&events, format!("render count={count}"));
            let events = Rc::clone(&events);
            tap_effect_with(count, move || {
                push(&events, format!("effect count={count}"));
                if count == 0 {
                    set_count.set(1);
                }
                let events = Rc::clone(&events);
                on_cleanup(move || push(&events, format!("cleanup count={count}")))
            });
            count
        })
    };

    let handle = create_resource(body.unit(), strict()).expect("mount");
    assert_eq!(handle.get_value(), 1);
    assert_eq!(
        take(&events),
        vec![
            "render count=0",
            "render count=0",
            "effect count=0",
            "cleanup count=0",
            "effect count=0",
            "render count=1",
            "render count=1",
            "cleanup count=0",
            "effect count=1",
        ]
    );
}

#[test]
fn updates_from_the_first_mount_survive_the_remount() {
    let events: Events = Rc::default();
    let body = {
        let events = Rc::clone(&events);
        resource(move |_: &()| {
            let (id, set_id) = tap_state(0);
            push(&events, format!("render-{id}"));
            let events = Rc::clone(&events);
            tap_effect(move || {
                push(&events, format!("mount-{id}"));
                set_id.set(1);
                let events = Rc::clone(&events);
                on_cleanup(move || push(&events, format!("unmount-{id}")))
            });
        })
    };

    create_resource(body.unit(), strict()).expect("mount");
    assert_eq!(
        take(&events),
        vec![
            "render-0",
            "render-0",
            "mount-0",
            "unmount-0",
            "mount-0",
            "render-1",
            "render-1",
            "unmount-0",
            "mount-1",
        ]
    );
}

#[test]
fn synchronous_updates_render_twice() {
    let events: Events = Rc::default();
    let body = {
        let events = Rc::clone(&events);
        resource(move |_: &()| {
            let (count, set_count) = tap_state(0);
            push(&events, format!("render count={count}"));
            (count, set_count)
        })
    };

    let handle = create_resource(body.unit(), strict()).expect("mount");
    assert_eq!(take(&events), vec!["render count=0", "render count=0"]);

    for expected in 1..=2 {
        flush_resources_sync(|| {
            let (count, set_count): (i32, StateSetter<i32>) = handle.get_value();
            push(&events, "increment");
            set_count.set(count + 1);
        })
        .expect("flush");
        let rendered = format!("render count={expected}");
        assert_eq!(take(&events), vec!["increment".to_string(), rendered.clone(), rendered]);
    }
}

#[test]
fn queued_updater_runs_once_more_while_rendering() {
    let calls = Rc::new(Cell::new(0));
    let body = resource(|_: &()| tap_state(0));
    let handle = create_resource(body.unit(), strict()).expect("mount");

    let counted = Rc::clone(&calls);
    flush_resources_sync(|| {
        handle.get_value().1.update(move |count| {
            counted.set(counted.get() + 1);
            count + 1
        });
    })
    .expect("flush");
    assert_eq!(calls.get(), 2);
    assert_eq!(handle.get_value().0, 1);
}

#[test]
fn children_inherit_strictness() {
    let renders = Rc::new(Cell::new(0));
    let child = {
        let renders = Rc::clone(&renders);
        resource(move |_: &()| {
            renders.set(renders.get() + 1);
            renders.get()
        })
    };
    let parent = resource(move |_: &()| tap_resource(&child.unit()));

    let handle = create_resource(parent.unit(), strict()).expect("mount");
    assert_eq!(renders.get(), 2);
    assert_eq!(handle.get_value(), 2);
}
