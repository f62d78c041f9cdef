//! End-to-end behaviour of the viewer against a scripted provider.

mod common;

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use common::{created_event, recorder, Calls, Harness};
use widget_viewer::{
    Completion, DeleteType, Event, Fault, Packet, ScriptOperators, SessionState, SizeType, Surface,
    ViewerError, Visibility, WidgetHandle,
};

fn add_1x1(t: &mut Harness, cb: Option<Completion>) -> WidgetHandle {
    t.viewer
        .add("pkg.widget", None, Some("c1"), Some("cat1"), -1.0, SizeType::S1x1, cb)
        .expect("add")
}

/// A confirmed 1x1 instance, with its `Created` event already consumed.
fn confirmed(t: &mut Harness, id: &str) -> WidgetHandle {
    let h = add_1x1(t, None);
    t.settle();
    t.confirm(id);
    t.events.borrow_mut().clear();
    h
}

fn deleted_event(id: &str, timestamp: f64) -> Packet {
    Packet::new("deleted")
        .arg("pkg.widget")
        .arg(id)
        .arg(timestamp)
        .arg(0_i32)
}

// ============================================================================
// Session
// ============================================================================

#[test]
fn test_add_before_init_is_fault() {
    let mut t = Harness::new();
    let result = t
        .viewer
        .add("pkg.widget", None, None, None, -1.0, SizeType::S1x1, None);
    assert_eq!(result, Err(ViewerError::Fault));
}

#[test]
fn test_double_init_is_rejected() {
    let mut t = Harness::new().connected();
    assert_eq!(t.viewer.init(), Err(ViewerError::AlreadyExist));
}

#[test]
fn test_init_without_provider_retries_later() {
    let mut t = Harness::new();
    t.provider.state().refuse_connect = true;
    assert_eq!(t.viewer.init(), Ok(()));
    assert_eq!(t.viewer.session_state(), SessionState::Disconnected);

    t.provider.state().refuse_connect = false;
    t.viewer.notify_provider_ready();
    assert_eq!(t.viewer.session_state(), SessionState::Connecting);
    t.step();
    assert_eq!(t.provider.count("acquire"), 1);
}

#[test]
fn test_rejected_handshake_reports_fault_and_disconnects() {
    let mut t = Harness::new();
    t.viewer.init().unwrap();
    t.step();
    t.provider.reply("acquire", ViewerError::PermissionDenied.code());
    t.step();

    assert_eq!(t.viewer.session_state(), SessionState::Disconnected);
    let faults = t.faults.borrow();
    assert_eq!(faults[0], Fault::HandshakeRejected(ViewerError::PermissionDenied));
}

#[test]
fn test_fini_releases_synchronously() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    t.viewer.fini();

    let state = t.provider.state();
    assert_eq!(state.sync_sent.len(), 1);
    assert_eq!(state.sync_sent[0].command, "release");
    drop(state);
    assert!(!t.viewer.is_valid(h));
    assert_eq!(t.viewer.instance_count(), 0);
}

// ============================================================================
// Creation and sharing
// ============================================================================

#[test]
fn test_add_completes_on_matching_created_event() {
    let mut t = Harness::new().connected();
    let calls = Calls::default();
    let h = add_1x1(&mut t, Some(recorder(&calls)));

    assert!(t.viewer.is_valid(h));
    assert_eq!(t.viewer.queued_commands(), vec!["new"]);
    t.settle();
    assert_eq!(t.provider.count("new"), 1);
    assert!(calls.borrow().is_empty());
    assert_eq!(t.viewer.id(h), Err(ViewerError::Fault));

    t.confirm("inst-1");
    assert_eq!(*calls.borrow(), vec![(h, Ok(0))]);
    assert_eq!(t.viewer.id(h), Ok("inst-1"));
    assert_eq!(t.viewer.size(h), Ok((175, 175)));
    assert_eq!(t.viewer.size_type(h), Ok(SizeType::S1x1));
    assert!(t.events_for(h).is_empty());
}

#[test]
fn test_add_rejects_invalid_arguments() {
    let mut t = Harness::new().connected();
    assert_eq!(
        t.viewer.add("", None, None, None, -1.0, SizeType::S1x1, None),
        Err(ViewerError::InvalidParameter)
    );
    assert_eq!(
        t.viewer.add("pkg.widget", None, None, None, f64::NAN, SizeType::S1x1, None),
        Err(ViewerError::InvalidParameter)
    );
    assert!(t.viewer.queued_commands().is_empty());
}

#[test]
fn test_shared_add_completes_once_without_new_request() {
    let mut t = Harness::shared().connected();
    let h1 = confirmed(&mut t, "inst-1");

    let calls = Calls::default();
    let h2 = add_1x1(&mut t, Some(recorder(&calls)));
    assert!(calls.borrow().is_empty());
    assert_ne!(h1, h2);

    t.step();
    assert_eq!(*calls.borrow(), vec![(h2, Ok(0))]);
    t.settle();
    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(t.provider.count("new"), 1);
    assert_eq!(t.viewer.subscriber_count(h1), Ok(2));
    assert_eq!(t.viewer.id(h2), Ok("inst-1"));
}

#[test]
fn test_sharing_disabled_creates_second_instance() {
    let mut t = Harness::new().connected();
    let _h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    t.settle();
    assert_eq!(t.provider.count("new"), 2);
    assert_eq!(t.viewer.subscriber_count(h2), Ok(1));
    assert_eq!(t.viewer.instance_count(), 2);
}

#[test]
fn test_provider_announced_instance_is_not_user_owned() {
    let mut t = Harness::new().connected();
    t.provider
        .push(created_event("pkg.remote", "r-1", 12.5, 354, 354, 0));
    t.step();

    let (h, event) = t.events.borrow()[0];
    assert_eq!(event, Event::Created);
    assert_eq!(t.viewer.is_user(h), Ok(false));
    assert_eq!(t.viewer.pkgname(h), Ok("pkg.remote"));
    assert_eq!(t.viewer.delete(h, DeleteType::Permanently, None), Err(ViewerError::PermissionDenied));
    assert_eq!(
        t.viewer.set_visibility(h, Visibility::HideWithPause),
        Err(ViewerError::PermissionDenied)
    );
    assert_eq!(t.viewer.resize(h, SizeType::S1x1, None), Err(ViewerError::PermissionDenied));
}

#[test]
fn test_duplicate_created_event_is_ignored() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let again = created_event("pkg.widget", "inst-1", 1.0, 175, 175, 0);
    t.provider.push(again);
    t.step();
    assert_eq!(t.viewer.instance_count(), 1);
    assert!(t.events.borrow().is_empty());
    assert!(t.viewer.is_valid(h));
}

// ============================================================================
// Deletion
// ============================================================================

#[test]
fn test_delete_shared_handle_stays_local() {
    let mut t = Harness::shared().connected();
    let h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    t.settle();

    let calls = Calls::default();
    t.viewer
        .delete(h2, DeleteType::Permanently, Some(recorder(&calls)))
        .unwrap();
    assert!(calls.borrow().is_empty());
    assert!(!t.viewer.is_valid(h2));
    assert_eq!(t.viewer.subscriber_count(h1), Ok(1));

    t.settle();
    assert_eq!(*calls.borrow(), vec![(h2, Ok(0))]);
    assert_eq!(t.provider.count("delete"), 0);
}

#[test]
fn test_refcount_tracks_attached_handles() {
    let mut t = Harness::shared().connected();
    let h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    let h3 = add_1x1(&mut t, None);
    t.settle();
    assert_eq!(t.viewer.subscriber_count(h1), Ok(3));

    t.viewer.delete(h1, DeleteType::Permanently, None).unwrap();
    assert_eq!(t.viewer.subscriber_count(h2), Ok(2));
    t.viewer.delete(h3, DeleteType::Permanently, None).unwrap();
    assert_eq!(t.viewer.subscriber_count(h2), Ok(1));
    t.settle();
    assert_eq!(t.viewer.instance_count(), 1);

    let calls = Calls::default();
    t.viewer
        .delete(h2, DeleteType::Permanently, Some(recorder(&calls)))
        .unwrap();
    assert_eq!(
        t.viewer.delete(h2, DeleteType::Permanently, None),
        Err(ViewerError::Busy)
    );
    t.settle();
    let delete = t.provider.last("delete").packet;
    assert_eq!(delete.str(1), Ok("inst-1"));
    assert_eq!(delete.int(2), Ok(0));
    assert_eq!(t.viewer.instance_count(), 1);

    t.provider.reply("delete", 0);
    t.provider.push(deleted_event("inst-1", 0.0));
    t.settle();
    assert_eq!(*calls.borrow(), vec![(h2, Ok(0))]);
    assert_eq!(t.viewer.instance_count(), 0);
    assert!(!t.viewer.is_valid(h2));
}

#[test]
fn test_failed_delete_restores_instance() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer
        .delete(h, DeleteType::Temporary, Some(recorder(&calls)))
        .unwrap();
    t.settle();
    assert_eq!(t.provider.last("delete").packet.int(2), Ok(1));

    t.provider.reply("delete", ViewerError::Fault.code());
    t.settle();
    assert_eq!(*calls.borrow(), vec![(h, Err(ViewerError::Fault))]);
    assert!(t.viewer.is_valid(h));
    assert!(t.viewer.delete(h, DeleteType::Permanently, None).is_ok());
}

#[test]
fn test_delete_before_confirmation_reissues_delete() {
    let mut t = Harness::new().connected();
    let created = Calls::default();
    let h = add_1x1(&mut t, Some(recorder(&created)));
    t.settle();
    let new = t.provider.last("new").packet;

    let deleted = Calls::default();
    t.viewer
        .delete(h, DeleteType::Permanently, Some(recorder(&deleted)))
        .unwrap();
    t.step();
    assert_eq!(*created.borrow(), vec![(h, Err(ViewerError::Canceled))]);
    assert_eq!(*deleted.borrow(), vec![(h, Ok(0))]);
    assert_eq!(t.provider.count("delete"), 0);

    t.provider.reply("new", 0);
    t.provider.push(common::created(&new, "inst-1"));
    t.settle();
    assert_eq!(t.provider.count("delete"), 1);
    assert_eq!(t.provider.last("delete").packet.str(1), Ok("inst-1"));
    assert!(t
        .events
        .borrow()
        .iter()
        .all(|(_, event)| *event != Event::Created));

    t.provider.reply("delete", 0);
    t.provider.push(deleted_event("inst-1", 0.0));
    t.settle();
    assert_eq!(t.viewer.instance_count(), 0);
    assert_eq!(created.borrow().len(), 1);
    assert_eq!(deleted.borrow().len(), 1);
}

#[test]
fn test_deleted_event_cancels_pending_creation() {
    let mut t = Harness::new().connected();
    let calls = Calls::default();
    let h = add_1x1(&mut t, Some(recorder(&calls)));
    t.settle();
    let timestamp = t.provider.last("new").packet.double(0).unwrap();

    t.provider.reply("new", 0);
    t.provider.push(deleted_event("", timestamp));
    t.settle();
    assert_eq!(*calls.borrow(), vec![(h, Err(ViewerError::Canceled))]);
    assert!(!t.viewer.is_valid(h));
    assert_eq!(t.viewer.instance_count(), 0);
}

#[test]
fn test_new_rejected_by_provider_fails_creation() {
    let mut t = Harness::new().connected();
    let calls = Calls::default();
    let h = add_1x1(&mut t, Some(recorder(&calls)));
    t.settle();
    t.provider.reply("new", ViewerError::OutOfMemory.code());
    t.settle();
    assert_eq!(*calls.borrow(), vec![(h, Err(ViewerError::OutOfMemory))]);
    assert!(!t.viewer.is_valid(h));
    assert_eq!(t.viewer.instance_count(), 0);
}

// ============================================================================
// Command queue
// ============================================================================

#[test]
fn test_send_failure_spends_ttl_then_fails_once() {
    let mut t = Harness::new().connected();
    t.provider.state().failing_sends = 3;
    let calls = Calls::default();
    let h = add_1x1(&mut t, Some(recorder(&calls)));
    t.settle();

    assert_eq!(*calls.borrow(), vec![(h, Err(ViewerError::Fault))]);
    assert_eq!(t.provider.count("new"), 0);
    assert!(!t.viewer.is_valid(h));
    t.settle();
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn test_transient_send_failure_is_retried() {
    let mut t = Harness::new().connected();
    t.provider.state().failing_sends = 2;
    let calls = Calls::default();
    let _h = add_1x1(&mut t, Some(recorder(&calls)));
    t.settle();
    assert_eq!(t.provider.count("new"), 1);
    assert!(calls.borrow().is_empty());
    assert_eq!(t.viewer.pending_replies(), 1);
}

#[test]
fn test_fault_package_clears_its_queued_commands() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    t.provider.clear_sent();

    let calls = Calls::default();
    t.viewer.set_period(h, 30.0, Some(recorder(&calls))).unwrap();
    t.viewer.click(h, 0.5, 0.5).unwrap();
    t.viewer.subscribe_group("c1", "cat1").unwrap();
    assert_eq!(t.viewer.queued_commands(), vec!["set_period", "clicked", "subscribe"]);

    t.provider.push(
        Packet::new("fault_package")
            .arg("pkg.widget")
            .arg("main.c")
            .arg("render"),
    );
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Err(ViewerError::Fault))]);
    assert!(t.faults.borrow().contains(&Fault::Deactivated {
        pkgname: "pkg.widget".into(),
        file: "main.c".into(),
        func: "render".into(),
    }));
    t.settle();
    assert_eq!(t.provider.sent_names(), vec!["subscribe"]);

    // The flag went with the cleared request.
    assert!(t.viewer.set_period(h, 30.0, None).is_ok());
}

// ============================================================================
// Operations
// ============================================================================

#[test]
fn test_second_request_of_same_kind_is_busy() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");

    assert_eq!(t.viewer.resize(h, SizeType::S1x1, None), Err(ViewerError::AlreadyExist));
    assert!(t.viewer.resize(h, SizeType::S2x2, None).is_ok());
    assert_eq!(t.viewer.resize(h, SizeType::S4x4, None), Err(ViewerError::Busy));
    assert!(t.viewer.set_period(h, 10.0, None).is_ok());
    assert_eq!(t.viewer.set_period(h, 20.0, None), Err(ViewerError::Busy));
    assert_eq!(t.viewer.queued_commands(), vec!["resize", "set_period"]);
}

#[test]
fn test_period_change_round_trip() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer.set_period(h, 30.0, Some(recorder(&calls))).unwrap();
    t.settle();
    let request = t.provider.last("set_period").packet;
    assert_eq!(request.str(1), Ok("inst-1"));
    assert_eq!(request.double(2), Ok(30.0));

    t.provider.reply("set_period", 0);
    t.step();
    assert!(calls.borrow().is_empty());

    t.provider.push(
        Packet::new("period_changed")
            .arg("pkg.widget")
            .arg("inst-1")
            .arg(0_i32)
            .arg(30.0_f64),
    );
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Ok(0))]);
    assert_eq!(t.viewer.period(h), Ok(30.0));
    assert_eq!(t.viewer.set_period(h, 30.0, None), Err(ViewerError::AlreadyExist));
}

#[test]
fn test_failed_reply_releases_operation() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer
        .set_group(h, "c2", "cat2", Some(recorder(&calls)))
        .unwrap();
    t.settle();
    t.provider.reply("change_group", ViewerError::InvalidParameter.code());
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Err(ViewerError::InvalidParameter))]);
    assert_eq!(t.viewer.group(h), Ok(("c1", "cat1")));
    assert!(t.viewer.set_group(h, "c2", "cat2", None).is_ok());
}

#[test]
fn test_operations_on_unconfirmed_instance_fault() {
    let mut t = Harness::new().connected();
    let h = add_1x1(&mut t, None);
    assert_eq!(t.viewer.set_period(h, 5.0, None), Err(ViewerError::Fault));
    assert_eq!(t.viewer.click(h, 0.1, 0.1), Err(ViewerError::Fault));
    assert_eq!(t.viewer.create_gbar(h, 0.5, 0.5, None), Err(ViewerError::Fault));
    assert_eq!(t.viewer.queued_commands(), vec!["new"]);
}

#[test]
fn test_pinup_requires_support() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    assert_eq!(t.viewer.pinup_supported(h), Ok(true));
    assert_eq!(t.viewer.set_pinup(h, false, None), Err(ViewerError::AlreadyExist));
    assert!(t.viewer.set_pinup(h, true, None).is_ok());
    t.settle();
    assert_eq!(t.provider.last("pinup_changed").packet.int(2), Ok(1));
}

#[test]
fn test_gbar_lifecycle() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    assert_eq!(
        t.viewer.mouse_event(h, Surface::Secondary, widget_viewer::MouseEvent::Down, 0.1, 0.1),
        Err(ViewerError::InvalidParameter)
    );
    assert_eq!(t.viewer.destroy_gbar(h, None), Err(ViewerError::InvalidParameter));

    let calls = Calls::default();
    t.viewer.create_gbar(h, 0.5, 0.0, Some(recorder(&calls))).unwrap();
    t.settle();
    t.provider.reply("create_gbar", 0);
    t.provider.push(
        Packet::new("gbar_created")
            .arg("pkg.widget")
            .arg("inst-1")
            .arg("")
            .arg(720_i64)
            .arg(400_i64)
            .arg(0_i32),
    );
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Ok(0))]);
    assert_eq!(t.viewer.is_gbar_created(h), Ok(true));
    assert_eq!(t.viewer.gbar_size(h), Ok((720, 400)));
    assert_eq!(t.viewer.create_gbar(h, 0.5, 0.0, None), Err(ViewerError::AlreadyExist));

    t.viewer
        .mouse_event(h, Surface::Secondary, widget_viewer::MouseEvent::Down, 0.1, 0.1)
        .unwrap();
    t.viewer.move_gbar(h, 0.2, 0.3).unwrap();
    t.settle();
    assert_eq!(t.provider.count("gbar_mouse_down"), 1);
    assert_eq!(t.provider.count("gbar_move"), 1);

    t.provider.push(Packet::new("close_gbar").arg("pkg.widget").arg("inst-1").arg(0_i32));
    t.step();
    assert!(t.events_for(h).contains(&Event::RequestCloseGbar));

    t.viewer.destroy_gbar(h, None).unwrap();
    t.settle();
    t.provider.reply("destroy_gbar", 0);
    t.provider.push(Packet::new("gbar_destroyed").arg("pkg.widget").arg("inst-1").arg(0_i32));
    t.step();
    assert_eq!(t.viewer.is_gbar_created(h), Ok(false));
    assert!(t.events_for(h).contains(&Event::GbarDestroyed));
}

#[test]
fn test_access_status_reaches_completion() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer
        .access_event(h, widget_viewer::AccessAction::Activate, 10, 20, Some(recorder(&calls)))
        .unwrap();
    t.settle();
    let request = t.provider.last("widget_access_activate").packet;
    assert_eq!(request.int(4), Ok(20));
    t.provider.reply("widget_access_activate", 0);
    t.provider.push(Packet::new("access_status").arg("pkg.widget").arg("inst-1").arg(2_i32));
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Ok(2))]);
}

#[test]
fn test_acquire_pixmap_returns_id() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer
        .acquire_pixmap(h, Surface::Main, recorder(&calls))
        .unwrap();
    t.settle();
    t.provider
        .reply_with("widget_acquire_pixmap", Packet::new("r").arg(0_i32).arg(77_i32));
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Ok(77))]);
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_resize_sole_subscriber_resizes_in_place() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer.resize(h, SizeType::S2x2, Some(recorder(&calls))).unwrap();
    t.settle();
    let request = t.provider.last("resize").packet;
    assert_eq!((request.int(2), request.int(3)), (Ok(354), Ok(354)));

    t.provider.reply("resize", 0);
    t.provider.push(
        Packet::new("size_changed")
            .arg("pkg.widget")
            .arg("inst-1")
            .arg(0_i32)
            .arg(354_i64)
            .arg(354_i64)
            .arg("")
            .arg(0_i32),
    );
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Ok(0))]);
    assert_eq!(t.viewer.size_type(h), Ok(SizeType::S2x2));
}

#[test]
fn test_resize_shared_handle_relinks() {
    let mut t = Harness::shared().connected();
    let h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    t.settle();
    t.provider.clear_sent();

    let calls = Calls::default();
    t.viewer.resize(h2, SizeType::S2x2, Some(recorder(&calls))).unwrap();
    assert_eq!(t.viewer.subscriber_count(h1), Ok(1));
    assert_eq!(t.viewer.size(h1), Ok((175, 175)));
    t.settle();
    assert_eq!(t.provider.count("resize"), 0);
    let new = t.provider.last("new").packet;
    assert_eq!((new.int(6), new.int(7)), (Ok(354), Ok(354)));

    t.confirm("inst-2");
    assert_eq!(*calls.borrow(), vec![(h2, Ok(0))]);
    assert_eq!(t.viewer.id(h2), Ok("inst-2"));
    assert_eq!(t.viewer.size(h2), Ok((354, 354)));
    assert_eq!(t.viewer.id(h1), Ok("inst-1"));
    assert_eq!(t.viewer.size(h1), Ok((175, 175)));
    assert_eq!(t.viewer.instance_count(), 2);
}

#[test]
fn test_resize_shared_handle_joins_existing_instance() {
    let mut t = Harness::shared().connected();
    let h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    t.settle();
    let h3 = t
        .viewer
        .add("pkg.widget", None, Some("c1"), Some("cat1"), -1.0, SizeType::S2x2, None)
        .unwrap();
    t.settle();
    t.confirm("inst-2");
    t.provider.clear_sent();
    t.events.borrow_mut().clear();

    let calls = Calls::default();
    t.viewer.resize(h2, SizeType::S2x2, Some(recorder(&calls))).unwrap();
    assert!(calls.borrow().is_empty());
    assert_eq!(t.viewer.id(h2), Ok("inst-2"));
    assert_eq!(t.viewer.subscriber_count(h1), Ok(1));
    assert_eq!(t.viewer.subscriber_count(h3), Ok(2));

    t.step();
    assert_eq!(*calls.borrow(), vec![(h2, Ok(0))]);
    t.settle();
    assert_eq!(t.provider.count("new"), 0);
    assert_eq!(t.provider.count("resize"), 0);
    assert_eq!(t.viewer.size(h2), Ok((354, 354)));
    assert_eq!(t.viewer.instance_count(), 2);
    assert!(t.events_for(h2).is_empty());
}

#[test]
fn test_relink_without_completion_reports_size_change() {
    let mut t = Harness::shared().connected();
    let _h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    t.settle();
    t.events.borrow_mut().clear();

    t.viewer.resize(h2, SizeType::S2x2, None).unwrap();
    t.settle();
    t.confirm("inst-2");
    assert_eq!(t.events_for(h2), vec![Event::SizeChanged(Surface::Main)]);
}

// ============================================================================
// Visibility
// ============================================================================

#[test]
fn test_visibility_aggregate_sent_once() {
    let mut t = Harness::shared().connected();
    let h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    t.settle();
    t.provider.clear_sent();

    t.viewer.set_visibility(h1, Visibility::Hide).unwrap();
    t.settle();
    assert_eq!(t.provider.count("change,visibility"), 0);

    t.viewer.set_visibility(h2, Visibility::Hide).unwrap();
    t.settle();
    assert_eq!(t.provider.count("change,visibility"), 1);
    assert_eq!(t.provider.last("change,visibility").packet.int(2), Ok(1));

    t.viewer.set_visibility(h1, Visibility::HideWithPause).unwrap();
    t.settle();
    assert_eq!(t.provider.count("change,visibility"), 1);
    assert_eq!(t.viewer.set_visibility(h1, Visibility::HideWithPause), Err(ViewerError::AlreadyExist));

    t.viewer.set_visibility(h2, Visibility::Show).unwrap();
    t.settle();
    assert_eq!(t.provider.count("change,visibility"), 2);
    assert_eq!(t.provider.last("change,visibility").packet.int(2), Ok(0));
}

#[test]
fn test_moving_last_shown_subscriber_hides_old_instance() {
    let mut t = Harness::shared().connected();
    let h1 = confirmed(&mut t, "inst-1");
    let h2 = add_1x1(&mut t, None);
    t.settle();
    t.viewer.set_visibility(h1, Visibility::Hide).unwrap();
    t.settle();
    t.provider.clear_sent();

    t.viewer.resize(h2, SizeType::S2x2, None).unwrap();
    t.settle();
    t.confirm("inst-2");
    t.settle();

    assert_eq!(t.provider.count("change,visibility"), 1);
    let change = t.provider.last("change,visibility").packet;
    assert_eq!(change.str(1), Ok("inst-1"));
    assert_eq!(change.int(2), Ok(1));
    assert_eq!(t.viewer.visibility(h2), Ok(Visibility::Show));
}

fn updated(id: &str, fbfile: &str) -> Packet {
    Packet::new("widget_updated")
        .arg("pkg.widget")
        .arg(id)
        .arg(fbfile)
        .arg(175_i64)
        .arg(175_i64)
        .arg(0.5_f64)
        .arg("")
        .arg("new title")
}

#[test]
fn test_paused_updates_replay_once_on_resume() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    t.viewer.set_visibility(h, Visibility::HideWithPause).unwrap();
    t.settle();
    assert_eq!(t.provider.last("change,visibility").packet.int(2), Ok(2));

    t.provider.push(updated("inst-1", ""));
    t.provider.push(updated("inst-1", ""));
    t.step();
    assert!(t.events_for(h).is_empty());
    assert_eq!(t.viewer.paused_updates(h), Ok(2));
    assert_eq!(t.viewer.title(h), Ok("new title"));

    t.viewer.set_visibility(h, Visibility::Show).unwrap();
    assert_eq!(t.viewer.paused_updates(h), Ok(0));
    t.step();
    assert_eq!(t.events_for(h), vec![Event::Updated(Surface::Main)]);
}

#[test]
fn test_hidden_handle_still_receives_updates() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    t.viewer.set_visibility(h, Visibility::Hide).unwrap();
    t.provider.push(updated("inst-1", ""));
    t.step();
    assert_eq!(t.events_for(h), vec![Event::Updated(Surface::Main)]);
}

#[test]
fn test_frames_dropped_while_resizing() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    t.viewer.resize(h, SizeType::S2x2, None).unwrap();
    t.provider.push(updated("inst-1", ""));
    t.step();
    assert!(t.events_for(h).is_empty());
}

// ============================================================================
// Text content
// ============================================================================

#[derive(Clone, Default)]
struct TextRecorder {
    calls: Rc<RefCell<Vec<String>>>,
}

impl ScriptOperators for TextRecorder {
    fn update_begin(&mut self, _h: WidgetHandle) {
        self.calls.borrow_mut().push("begin".into());
    }
    fn update_end(&mut self, _h: WidgetHandle) {
        self.calls.borrow_mut().push("end".into());
    }
    fn update_text(&mut self, _h: WidgetHandle, id: Option<&str>, part: &str, text: &str) {
        self.calls
            .borrow_mut()
            .push(format!("text {:?} {} {}", id, part, text));
    }
}

#[test]
fn test_text_content_replays_descriptor() {
    let mut t = Harness::new().connected();
    let h = add_1x1(&mut t, None);
    t.settle();
    let new = t.provider.last("new").packet;
    let timestamp = new.double(0).unwrap();
    t.provider.reply("new", 0);
    t.provider
        .push(created_event("pkg.widget", "inst-1", timestamp, 175, 175, 2));
    t.settle();
    assert_eq!(
        t.viewer.content_type(h, Surface::Main),
        Ok(widget_viewer::ContentType::Text)
    );

    let recorder = TextRecorder::default();
    t.viewer
        .set_script_operators(h, Surface::Main, Box::new(recorder.clone()))
        .unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{\ntype=text\npart=title\ndata=Hello\nid=1\n}}\n").unwrap();
    let path = file.path().to_str().unwrap().to_owned();

    t.provider.push(updated("inst-1", &path));
    t.step();
    assert_eq!(
        *recorder.calls.borrow(),
        vec!["begin", "text Some(\"1\") title Hello", "end"]
    );
    assert!(t.events_for(h).contains(&Event::Updated(Surface::Main)));

    // Operators survive the replay.
    t.provider.push(updated("inst-1", &path));
    t.step();
    assert_eq!(recorder.calls.borrow().len(), 6);
}

#[test]
fn test_paused_text_subscriber_still_receives_content() {
    let mut t = Harness::new().connected();
    let h = add_1x1(&mut t, None);
    t.settle();
    let timestamp = t.provider.last("new").packet.double(0).unwrap();
    t.provider.reply("new", 0);
    t.provider
        .push(created_event("pkg.widget", "inst-1", timestamp, 175, 175, 2));
    t.settle();
    t.events.borrow_mut().clear();

    let recorder = TextRecorder::default();
    t.viewer
        .set_script_operators(h, Surface::Main, Box::new(recorder.clone()))
        .unwrap();
    t.viewer.set_visibility(h, Visibility::HideWithPause).unwrap();
    t.settle();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{\ntype=text\npart=title\ndata=While paused\n}}\n").unwrap();
    let path = file.path().to_str().unwrap().to_owned();

    t.provider.push(updated("inst-1", &path));
    t.step();
    assert_eq!(
        *recorder.calls.borrow(),
        vec!["begin", "text None title While paused", "end"]
    );
    assert!(t.events_for(h).is_empty());
    assert_eq!(t.viewer.paused_updates(h), Ok(1));

    t.viewer.set_visibility(h, Visibility::Show).unwrap();
    t.step();
    assert_eq!(t.events_for(h), vec![Event::Updated(Surface::Main)]);
    assert_eq!(recorder.calls.borrow().len(), 3);
}

// ============================================================================
// Handlers
// ============================================================================

#[test]
fn test_handler_removing_itself_does_not_skip_others() {
    let mut t = Harness::new().connected();
    let order = Rc::new(RefCell::new(Vec::new()));
    let own_token = Rc::new(Cell::new(None));

    let log = Rc::clone(&order);
    let token_cell = Rc::clone(&own_token);
    let token = t.viewer.add_event_handler(move |v, _, _| {
        log.borrow_mut().push("self-removing");
        if let Some(token) = token_cell.take() {
            v.remove_event_handler(token).unwrap();
        }
    });
    own_token.set(Some(token));
    let log = Rc::clone(&order);
    t.viewer
        .add_event_handler(move |_, _, _| log.borrow_mut().push("after"));

    t.provider
        .push(created_event("pkg.remote", "r-1", 1.0, 175, 175, 0));
    t.provider
        .push(created_event("pkg.remote", "r-2", 2.0, 175, 175, 0));
    t.step();

    assert_eq!(*order.borrow(), vec!["self-removing", "after", "after"]);
    assert_eq!(t.events.borrow().len(), 2);
    assert_eq!(
        t.viewer.remove_event_handler(token),
        Err(ViewerError::InvalidParameter)
    );
}

// ============================================================================
// Disconnect
// ============================================================================

#[test]
fn test_disconnect_fails_pending_work_and_deletes_handles() {
    let mut t = Harness::new().connected();
    let h1 = confirmed(&mut t, "inst-1");
    let period = Calls::default();
    t.viewer.set_period(h1, 15.0, Some(recorder(&period))).unwrap();

    let created = Calls::default();
    let h2 = add_1x1(&mut t, Some(recorder(&created)));
    t.settle();
    t.events.borrow_mut().clear();

    t.provider.drop_connection();
    t.step();

    assert_eq!(*period.borrow(), vec![(h1, Err(ViewerError::Fault))]);
    assert_eq!(*created.borrow(), vec![(h2, Err(ViewerError::Fault))]);
    assert_eq!(t.events_for(h1), vec![Event::Deleted]);
    assert_eq!(*t.faults.borrow(), vec![Fault::ProviderDisconnected]);
    assert_eq!(t.viewer.session_state(), SessionState::Disconnected);
    assert_eq!(t.viewer.instance_count(), 0);
    assert!(!t.viewer.is_valid(h1));
    assert!(!t.viewer.is_valid(h2));

    t.settle();
    assert_eq!(period.borrow().len(), 1);
    assert_eq!(created.borrow().len(), 1);

    t.provider.clear_sent();
    t.now += Duration::from_secs(5);
    t.step();
    t.step();
    assert_eq!(t.provider.count("acquire"), 1);
}

#[test]
fn test_disconnect_completes_pending_delete() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer
        .delete(h, DeleteType::Permanently, Some(recorder(&calls)))
        .unwrap();
    t.settle();
    t.provider.reply("delete", 0);
    t.step();
    t.events.borrow_mut().clear();

    t.provider.drop_connection();
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Ok(0))]);
    assert!(t.events_for(h).is_empty());
}

#[test]
fn test_disconnect_while_delete_in_flight_succeeds() {
    let mut t = Harness::new().connected();
    let h = confirmed(&mut t, "inst-1");
    let calls = Calls::default();
    t.viewer
        .delete(h, DeleteType::Permanently, Some(recorder(&calls)))
        .unwrap();
    t.settle();
    assert_eq!(t.viewer.pending_replies(), 1);
    t.events.borrow_mut().clear();

    t.provider.drop_connection();
    t.step();
    assert_eq!(*calls.borrow(), vec![(h, Ok(0))]);
    assert!(t.events_for(h).is_empty());
    assert!(!t.viewer.is_valid(h));

    t.settle();
    assert_eq!(calls.borrow().len(), 1);
}

// ============================================================================
// Host data
// ============================================================================

#[test]
fn test_host_data_attachment() {
    let mut t = Harness::new().connected();
    let h = add_1x1(&mut t, None);
    t.viewer.set_data(h, String::from("slot-3")).unwrap();
    assert_eq!(t.viewer.data::<String>(h).map(String::as_str), Some("slot-3"));
    assert_eq!(t.viewer.data::<u32>(h), None);
    assert_eq!(t.viewer.take_data::<u32>(h), None);
    assert_eq!(t.viewer.take_data::<String>(h), Some("slot-3".to_owned()));
    assert_eq!(t.viewer.data::<String>(h), None);
}
