use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tap_core::{
    create_resource_context, on_cleanup, resource, tap_callback, tap_context, tap_effect_event,
    tap_effect_with, tap_memo, tap_resource, tap_resources, tap_resources_with, tap_state,
    tap_state_with, with_context_provider, EffectEvent, Element, Resource, StateSetter,
};
use tap_testing::{cleanup_all_resources, create_test_resource, render_test, wait_for_next_tick};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type Log = Rc<RefCell<Vec<String>>>;

/// Child that reports `label#instance` and logs its disposal.
fn tracked_child(instances: &Rc<Cell<u32>>, log: &Log) -> Resource<&'static str, String> {
    let instances = Rc::clone(instances);
    let log = Rc::clone(log);
    resource(move |label: &&'static str| {
        let (instance, _) = tap_state_with(|| {
            instances.set(instances.get() + 1);
            instances.get()
        });
        let label = *label;
        let log = Rc::clone(&log);
        tap_effect_with((), move || {
            let log = Rc::clone(&log);
            on_cleanup(move || log.borrow_mut().push(format!("dispose {label}")))
        });
        format!("{label}#{instance}")
    })
}

fn keyed(child: &Resource<&'static str, String>, labels: &[&'static str]) -> Vec<Element<&'static str, String>> {
    labels.iter().map(|label| child.keyed(*label, *label)).collect()
}

#[test]
fn keyed_children_keep_their_instances() {
    init_logging();
    let instances = Rc::new(Cell::new(0));
    let log: Log = Rc::default();
    let child = tracked_child(&instances, &log);
    let list = create_test_resource(move |labels: &Vec<&'static str>| tap_resources(&keyed(&child, labels)));

    assert_eq!(render_test(&list, vec!["a", "b", "c"]), vec!["a#1", "b#2", "c#3"]);
    assert_eq!(render_test(&list, vec!["b", "c", "d"]), vec!["b#2", "c#3", "d#4"]);
    assert_eq!(*log.borrow(), vec!["dispose a"]);

    assert_eq!(render_test(&list, vec!["d", "b"]), vec!["d#4", "b#2"]);
    assert_eq!(*log.borrow(), vec!["dispose a", "dispose c"]);

    list.unmount();
    let mut disposed = log.borrow().clone();
    disposed.sort();
    assert_eq!(disposed, vec!["dispose a", "dispose b", "dispose c", "dispose d"]);
    cleanup_all_resources();
}

#[test]
fn resource_change_under_a_key_starts_fresh() {
    init_logging();
    let instances = Rc::new(Cell::new(0));
    let log: Log = Rc::default();
    let first = tracked_child(&instances, &log);
    let second = tracked_child(&instances, &log);
    let list = create_test_resource(move |use_second: &bool| {
        let child = if *use_second { &second } else { &first };
        tap_resources(&[child.keyed("slot", "slot")])
    });

    assert_eq!(render_test(&list, false), vec!["slot#1"]);
    assert_eq!(render_test(&list, false), vec!["slot#1"]);
    assert!(log.borrow().is_empty());

    assert_eq!(render_test(&list, true), vec!["slot#2"]);
    assert_eq!(*log.borrow(), vec!["dispose slot"]);
    cleanup_all_resources();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
#[should_panic(expected = "tap_resources did not provide a key for array at index 1")]
fn unkeyed_list_entry_panics() {
    let child = resource(|value: &i32| *value);
    let list = create_test_resource(move |_: &()| {
        tap_resources(&[child.keyed(1, 1), child.element(2)])
    });
    render_test(&list, ());
}

#[test]
#[should_panic(expected = "Duplicate key 7 in tap_resources")]
fn duplicate_keys_panic() {
    let child = resource(|value: &i32| *value);
    let list = create_test_resource(move |_: &()| {
        tap_resources(&[child.keyed(7, 1), child.keyed(7, 2)])
    });
    render_test(&list, ());
}

#[test]
fn single_child_keeps_state_until_its_key_changes() {
    init_logging();
    let instances = Rc::new(Cell::new(0));
    let log: Log = Rc::default();
    let child = tracked_child(&instances, &log);
    let parent = create_test_resource(move |key: &i32| tap_resource(&child.keyed(*key, "child")));

    assert_eq!(render_test(&parent, 1), "child#1");
    assert_eq!(render_test(&parent, 1), "child#1");
    assert_eq!(render_test(&parent, 2), "child#2");
    assert_eq!(*log.borrow(), vec!["dispose child"]);

    parent.unmount();
    assert_eq!(log.borrow().len(), 2);
    cleanup_all_resources();
}

#[test]
fn memo_recomputes_only_when_deps_change() {
    init_logging();
    let computes = Rc::new(Cell::new(0));
    let test = {
        let computes = Rc::clone(&computes);
        create_test_resource(move |size: &usize| {
            let size = *size;
            tap_memo(
                || {
                    computes.set(computes.get() + 1);
                    Rc::new(vec![0u8; size])
                },
                size,
            )
        })
    };

    let first = render_test(&test, 3);
    let second = render_test(&test, 3);
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(computes.get(), 1);

    let third = render_test(&test, 4);
    assert!(!Rc::ptr_eq(&second, &third));
    assert_eq!(third.len(), 4);
    assert_eq!(computes.get(), 2);
    cleanup_all_resources();
}

type Callback = Rc<dyn Fn(i32) -> i32>;

#[test]
fn callback_identity_follows_its_deps() {
    init_logging();
    let callbacks: Rc<RefCell<Vec<Callback>>> = Rc::default();
    let test = {
        let callbacks = Rc::clone(&callbacks);
        create_test_resource(move |step: &i32| {
            let step = *step;
            let callback: Callback = tap_callback(move |value: i32| value + step, step);
            callbacks.borrow_mut().push(callback);
            step
        })
    };

    render_test(&test, 1);
    render_test(&test, 1);
    render_test(&test, 5);

    let callbacks = callbacks.borrow();
    assert!(Rc::ptr_eq(&callbacks[0], &callbacks[1]));
    assert_eq!(callbacks[1](1), 2);
    assert!(!Rc::ptr_eq(&callbacks[1], &callbacks[2]));
    assert_eq!(callbacks[2](1), 6);
    cleanup_all_resources();
}

/// Child that counts its renders and exposes a setter for its own state.
fn counted_child(renders: &Rc<Cell<u32>>) -> Resource<&'static str, (String, StateSetter<i32>)> {
    let renders = Rc::clone(renders);
    resource(move |label: &&'static str| {
        renders.set(renders.get() + 1);
        let (value, set_value) = tap_state(0);
        (format!("{label}:{value}"), set_value)
    })
}

fn labels_of(outputs: &[(String, StateSetter<i32>)]) -> Vec<String> {
    outputs.iter().map(|(label, _)| label.clone()).collect()
}

#[test]
fn gated_list_skips_children_while_deps_are_unchanged() {
    init_logging();
    let renders = Rc::new(Cell::new(0));
    let builds = Rc::new(Cell::new(0));
    let child = counted_child(&renders);
    let list = {
        let builds = Rc::clone(&builds);
        create_test_resource(move |&(count, _unrelated): &(usize, u32)| {
            let child = child.clone();
            let builds = Rc::clone(&builds);
            tap_resources_with(
                move || {
                    builds.set(builds.get() + 1);
                    ["a", "b", "c"][..count]
                        .iter()
                        .map(|label| child.keyed(*label, *label))
                        .collect()
                },
                count,
            )
        })
    };

    assert_eq!(labels_of(&render_test(&list, (2, 0))), vec!["a:0", "b:0"]);
    assert_eq!((builds.get(), renders.get()), (1, 2));

    assert_eq!(labels_of(&render_test(&list, (2, 1))), vec!["a:0", "b:0"]);
    assert_eq!((builds.get(), renders.get()), (1, 2));

    assert_eq!(labels_of(&render_test(&list, (3, 1))), vec!["a:0", "b:0", "c:0"]);
    assert_eq!((builds.get(), renders.get()), (2, 5));
    cleanup_all_resources();
}

#[test]
fn gated_list_rerenders_after_a_child_update() {
    init_logging();
    let renders = Rc::new(Cell::new(0));
    let child = counted_child(&renders);
    let list = create_test_resource(move |_: &()| {
        let child = child.clone();
        tap_resources_with(move || vec![child.keyed("a", "a"), child.keyed("b", "b")], ())
    });

    let outputs = render_test(&list, ());
    assert_eq!(renders.get(), 2);

    outputs[1].1.set(4);
    wait_for_next_tick();
    let committed = list.committed_output().expect("committed");
    assert_eq!(labels_of(&committed), vec!["a:0", "b:4"]);
    assert_eq!(renders.get(), 4);

    render_test(&list, ());
    assert_eq!(renders.get(), 4);
    cleanup_all_resources();
}

#[test]
fn update_below_a_single_child_reaches_the_gated_list() {
    init_logging();
    let renders = Rc::new(Cell::new(0));
    let leaf = counted_child(&renders);
    let wrapper = resource(move |label: &&'static str| tap_resource(&leaf.element(*label)));
    let list = create_test_resource(move |_: &()| {
        let wrapper = wrapper.clone();
        tap_resources_with(move || vec![wrapper.keyed("only", "leaf")], ())
    });

    let outputs = render_test(&list, ());
    outputs[0].1.set(9);
    wait_for_next_tick();
    let committed = list.committed_output().expect("committed");
    assert_eq!(labels_of(&committed), vec!["leaf:9"]);
    cleanup_all_resources();
}

#[test]
fn effect_event_runs_the_latest_committed_closure() {
    init_logging();
    let events: Rc<RefCell<Vec<EffectEvent<i32, String>>>> = Rc::default();
    let mounts = Rc::new(Cell::new(0));
    let test = {
        let events = Rc::clone(&events);
        let mounts = Rc::clone(&mounts);
        create_test_resource(move |label: &&'static str| {
            let label = *label;
            let describe = tap_effect_event(move |value: i32| format!("{label}={value}"));
            events.borrow_mut().push(describe.clone());
            let mounts = Rc::clone(&mounts);
            tap_effect_with((), move || mounts.set(mounts.get() + 1));
            label
        })
    };

    render_test(&test, "first");
    render_test(&test, "second");

    let events = events.borrow();
    assert_eq!(events[0], events[1]);
    assert_eq!(events[0].call(1), "second=1");
    assert_eq!(mounts.get(), 1);
    cleanup_all_resources();
}

#[test]
#[should_panic(expected = "Effect events cannot be called during render")]
fn effect_event_called_during_render_panics() {
    let test = create_test_resource(|_: &()| {
        let event = tap_effect_event(|value: i32| value + 1);
        event.call(1)
    });
    render_test(&test, ());
}

#[test]
fn provided_context_reaches_nested_bodies() {
    init_logging();
    let theme = create_resource_context(String::from("light"));
    let leaf = {
        let theme = theme.clone();
        resource(move |_: &()| tap_context(&theme))
    };
    let parent = create_test_resource(move |_: &()| tap_resource(&leaf.unit()));

    let themed = with_context_provider(&theme, String::from("dark"), || render_test(&parent, ()));
    assert_eq!(themed, "dark");
    assert_eq!(render_test(&parent, ()), "light");
    cleanup_all_resources();
}
