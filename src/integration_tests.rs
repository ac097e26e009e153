//! End-to-end tests of the compensation protocol.
//!
//! A small user service plays the participant: `add` runs as a sub-transaction
//! whose compensation is `delete(User)`, and the tests act as the coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::testing::{init_test_tracing, RecordingSender};
use crate::{
    payload_as, replay_compensations, CompensationMethod, CompensationOutcome, Compensator,
    EventType, InMemoryJournal, JournalSender, MessageHandler, MessageSender, SendError,
    TransactionContext, TxEvent, TxId, TxJournal, UuidGenerator, IdentityGenerator, WireFormat,
};

const DELETE_USER: &str = "delete(User)";
const ILLEGAL_USER: &str = "Illegal User";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NewUser {
    username: String,
    email: String,
}

impl NewUser {
    fn new(username: &str, email: &str) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    username: String,
    email: String,
}

#[derive(Debug, PartialEq, thiserror::Error)]
enum ServiceError {
    #[error("illegal user: {0}")]
    IllegalUser(String),
}

#[derive(Default)]
struct UserRepository {
    users: Mutex<HashMap<u64, User>>,
    next_id: AtomicU64,
    deletes: Mutex<Vec<u64>>,
}

impl UserRepository {
    fn save(&self, user: NewUser) -> User {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let saved = User {
            id,
            username: user.username,
            email: user.email,
        };
        self.users.lock().unwrap().insert(id, saved.clone());
        saved
    }

    fn find(&self, id: u64) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    fn delete_by_username(&self, username: &str) {
        let mut users = self.users.lock().unwrap();
        let id = users.values().find(|u| u.username == username).map(|u| u.id);
        if let Some(id) = id {
            users.remove(&id);
            self.deletes.lock().unwrap().push(id);
        }
    }

    fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }

    fn deleted_ids(&self) -> Vec<u64> {
        self.deletes.lock().unwrap().clone()
    }
}

struct UserService {
    repository: Arc<UserRepository>,
}

impl UserService {
    fn add(&self, ctx: &mut TransactionContext, user: NewUser) -> Result<User, ServiceError> {
        let payload = serde_json::to_value(&user).unwrap();
        ctx.transactional(DELETE_USER, vec![payload], |_| {
            if user.username == ILLEGAL_USER {
                return Err(ServiceError::IllegalUser(user.username.clone()));
            }
            Ok(self.repository.save(user))
        })
        .expect("interceptor boundary violated the nesting protocol")
    }
}

struct Participant {
    compensator: Compensator,
    service: UserService,
    repository: Arc<UserRepository>,
}

fn participant(sender: Arc<dyn MessageSender>) -> Participant {
    init_test_tracing();
    let repository = Arc::new(UserRepository::default());
    let repo = repository.clone();
    let compensator = Compensator::builder(sender)
        // usernames are unique, so the argument captured at Started is
        // enough to undo the save
        .compensation(DELETE_USER, move |payloads| {
            let user: NewUser = payload_as(payloads, 0)?;
            repo.delete_by_username(&user.username);
            Ok(())
        })
        .build()
        .unwrap();
    Participant {
        compensator,
        service: UserService {
            repository: repository.clone(),
        },
        repository,
    }
}

/// Context primed the way an interceptor would before invoking the service
fn primed_context(compensator: &Compensator) -> (TransactionContext, TxId, TxId, TxId) {
    let ids = UuidGenerator;
    let (global, local, parent) = (ids.new_id(), ids.new_id(), ids.new_id());
    let mut ctx = compensator.context();
    ctx.set_global_tx_id(global.clone()).unwrap();
    ctx.set_local_tx_id(local.clone()).unwrap();
    ctx.set_parent_tx_id(parent.clone()).unwrap();
    (ctx, global, local, parent)
}

fn started_frame(global: &TxId, local: &TxId, parent: &TxId, username: &str, email: &str) -> String {
    format!("{}:{}:{}:{}:TxStartedEvent:{}:{}", global, local, parent, DELETE_USER, username, email)
}

fn terminal_frame(global: &TxId, local: &TxId, parent: &TxId, tag: &str) -> String {
    format!("{}:{}:{}:{}:{}", global, local, parent, DELETE_USER, tag)
}

#[test]
fn sends_user_to_remote_around_transaction() {
    let sender = Arc::new(RecordingSender::text());
    let p = participant(sender.clone());
    let (mut ctx, global, local, parent) = primed_context(&p.compensator);

    let user = p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    assert_eq!(
        sender.text_frames(),
        vec![
            started_frame(&global, &local, &parent, "alice", "a@x.com"),
            terminal_frame(&global, &local, &parent, "TxEndedEvent"),
        ]
    );
    assert_eq!(p.repository.find(user.id), Some(user));
}

#[test]
fn sends_abort_event_on_sub_transaction_failure() {
    let sender = Arc::new(RecordingSender::text());
    let p = participant(sender.clone());
    let (mut ctx, global, local, parent) = primed_context(&p.compensator);

    let result = p.service.add(&mut ctx, NewUser::new(ILLEGAL_USER, "a@x.com"));

    // business error comes back untouched
    assert_eq!(result, Err(ServiceError::IllegalUser(ILLEGAL_USER.to_string())));
    assert_eq!(
        sender.text_frames(),
        vec![
            started_frame(&global, &local, &parent, ILLEGAL_USER, "a@x.com"),
            terminal_frame(&global, &local, &parent, "TxAbortedEvent"),
        ]
    );
    // abort never compensates locally
    assert_eq!(p.repository.delete_count(), 0);
}

#[test]
fn compensate_on_transaction_exception() {
    let sender = Arc::new(RecordingSender::text());
    let p = participant(sender.clone());
    let (mut ctx, global, first_local, _) = primed_context(&p.compensator);

    let user = p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    // another sub transaction to the same service within the same global transaction
    let second_local = ctx.new_local_tx_id();
    ctx.set_local_tx_id(second_local.clone()).unwrap();
    let another = p.service.add(&mut ctx, NewUser::new("jack", "jack@x.com")).unwrap();

    let handler = p.compensator.dispatcher();
    let method = CompensationMethod::from(DELETE_USER);
    assert_eq!(
        handler.on_receive(&global, &first_local, &method, &[json!(user)]),
        CompensationOutcome::Compensated
    );
    assert_eq!(
        handler.on_receive(&global, &second_local, &method, &[json!(another)]),
        CompensationOutcome::Compensated
    );

    assert_eq!(p.repository.find(user.id), None);
    assert_eq!(p.repository.find(another.id), None);

    // two independent event pairs under one global transaction
    let events = sender.events();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.global_tx_id() == &global));
    assert_eq!(events[0].local_tx_id(), events[1].local_tx_id());
    assert_eq!(events[2].local_tx_id(), events[3].local_tx_id());
    assert_ne!(events[0].local_tx_id(), events[2].local_tx_id());
}

#[test]
fn repeated_trigger_compensates_once() {
    let p = participant(Arc::new(RecordingSender::text()));
    let (mut ctx, global, local, _) = primed_context(&p.compensator);
    let user = p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    let handler = p.compensator.dispatcher();
    let method = CompensationMethod::from(DELETE_USER);
    let first = handler.on_receive(&global, &local, &method, &[json!(user)]);
    let second = handler.on_receive(&global, &local, &method, &[json!(user)]);

    assert_eq!(first, CompensationOutcome::Compensated);
    assert_eq!(second, CompensationOutcome::NotRegistered);
    assert_eq!(p.repository.delete_count(), 1);
    assert_eq!(p.compensator.stats().compensations_executed, 1);
}

#[test]
fn trigger_for_unknown_sub_transaction_is_noop() {
    let p = participant(Arc::new(RecordingSender::text()));
    let (mut ctx, global, _, _) = primed_context(&p.compensator);
    p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    let outcome = p.compensator.dispatcher().on_receive(
        &global,
        &"never-started".into(),
        &DELETE_USER.into(),
        &[],
    );
    assert_eq!(outcome, CompensationOutcome::NotRegistered);
    assert_eq!(p.repository.delete_count(), 0);
}

#[test]
fn context_compensate_delegates_to_dispatcher() {
    let p = participant(Arc::new(RecordingSender::text()));
    let (mut ctx, global, local, _) = primed_context(&p.compensator);
    let user = p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    let method = CompensationMethod::from(DELETE_USER);
    assert_eq!(
        ctx.compensate(&global, &local, &method, &[json!(user)]).unwrap(),
        CompensationOutcome::Compensated
    );
    // lenient by default
    assert_eq!(
        ctx.compensate(&global, &local, &method, &[json!(user)]).unwrap(),
        CompensationOutcome::NotRegistered
    );
}

#[test]
fn binary_frames_round_trip_started_fields() {
    let sender = Arc::new(RecordingSender::binary());
    let p = participant(sender.clone());
    let (mut ctx, global, local, parent) = primed_context(&p.compensator);
    p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    let frames = sender.frames();
    let started = WireFormat::Binary.decode(&frames[0]).unwrap();
    let ended = WireFormat::Binary.decode(&frames[1]).unwrap();

    assert_eq!(started.global_tx_id, global.as_str());
    assert_eq!(started.local_tx_id, local.as_str());
    assert_eq!(started.parent_tx_id, parent.as_str());
    assert_eq!(started.compensation_method, DELETE_USER);
    assert_eq!(started.event_type, EventType::Started);
    assert_eq!(started.fields, vec!["alice".to_string(), "a@x.com".to_string()]);
    assert_eq!(ended.event_type, EventType::Ended);
    assert!(ended.fields.is_empty());
}

#[test]
fn send_failure_does_not_change_business_result() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let sender = move |_: &TxEvent| -> Result<(), SendError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(SendError::Delivery("coordinator unreachable".into()))
    };
    let p = participant(Arc::new(sender));
    let (mut ctx, _, _, _) = primed_context(&p.compensator);

    let user = p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    assert_eq!(p.repository.find(user.id), Some(user));
    // one attempt per event, no retries
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(p.compensator.stats().send_failures, 2);
}

#[test]
fn nested_calls_chain_parent_ids() {
    let sender = Arc::new(RecordingSender::text());
    let p = participant(sender.clone());
    let mut root = p.compensator.root_context();

    let service = &p.service;
    let outer = root
        .transactional(DELETE_USER, vec![json!({"username": "outer", "email": "o@x.com"})], |ctx| {
            let mut child = ctx.nested().unwrap();
            service.add(&mut child, NewUser::new("inner", "i@x.com"))
        })
        .unwrap();
    assert!(outer.is_ok());

    let events = sender.events();
    let types: Vec<EventType> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![EventType::Started, EventType::Started, EventType::Ended, EventType::Ended]
    );
    let (outer_started, inner_started) = (&events[0], &events[1]);
    assert_eq!(outer_started.parent_tx_id(), outer_started.global_tx_id());
    assert_eq!(inner_started.parent_tx_id(), outer_started.local_tx_id());
    assert_eq!(inner_started.global_tx_id(), outer_started.global_tx_id());
    // the caller's identity is untouched by the nested call
    assert_eq!(root.local_tx_id(), Some(outer_started.local_tx_id()));
}

#[test]
fn replay_deletes_committed_users_newest_first() {
    let journal = Arc::new(InMemoryJournal::new());
    let p = participant(Arc::new(JournalSender::new(journal.clone())));
    let mut ctx = p.compensator.root_context();
    let global = ctx.global_tx_id().cloned().unwrap();

    let mut saved = Vec::new();
    for name in ["a", "b", "c"] {
        let local = ctx.new_local_tx_id();
        ctx.set_local_tx_id(local).unwrap();
        let user = p.service.add(&mut ctx, NewUser::new(name, "x@x.com")).unwrap();
        saved.push(user);
    }
    let failed_local = ctx.new_local_tx_id();
    ctx.set_local_tx_id(failed_local).unwrap();
    assert!(p.service.add(&mut ctx, NewUser::new(ILLEGAL_USER, "x@x.com")).is_err());

    let outcomes = replay_compensations(journal.as_ref(), &global, &p.compensator.dispatcher()).unwrap();
    assert_eq!(outcomes, vec![CompensationOutcome::Compensated; 3]);
    assert!(saved.iter().all(|user| p.repository.find(user.id).is_none()));
    let newest_first: Vec<u64> = saved.iter().rev().map(|user| user.id).collect();
    assert_eq!(p.repository.deleted_ids(), newest_first);
    assert!(p.compensator.registry().pending(&global).is_empty());
    assert_eq!(journal.read(&global).unwrap().len(), 8);
}

#[test]
fn replay_runs_compensations_in_reverse_completion_order() {
    let journal = Arc::new(InMemoryJournal::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let compensator = Compensator::builder(Arc::new(JournalSender::new(journal.clone())))
        .compensation("release(Seat)", move |payloads| {
            let seat: String = payload_as(payloads, 0)?;
            seen.lock().unwrap().push(seat);
            Ok(())
        })
        .build()
        .unwrap();

    let mut ctx = compensator.root_context();
    let global = ctx.global_tx_id().cloned().unwrap();
    for seat in ["1A", "1B", "1C"] {
        let local = ctx.new_local_tx_id();
        ctx.set_local_tx_id(local).unwrap();
        let booked: Result<Result<(), ServiceError>, _> =
            ctx.transactional("release(Seat)", vec![json!(seat)], |_| Ok(()));
        assert!(booked.unwrap().is_ok());
    }

    let outcomes = replay_compensations(journal.as_ref(), &global, &compensator.dispatcher()).unwrap();
    assert!(outcomes.iter().all(|o| *o == CompensationOutcome::Compensated));
    assert_eq!(*order.lock().unwrap(), vec!["1C", "1B", "1A"]);

    // a second replay finds nothing left to do
    let again = replay_compensations(journal.as_ref(), &global, &compensator.dispatcher()).unwrap();
    assert!(again.iter().all(|o| *o == CompensationOutcome::NotRegistered));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_compensate_exactly_once() {
    let p = participant(Arc::new(RecordingSender::text()));
    let (mut ctx, global, local, _) = primed_context(&p.compensator);
    let user = p.service.add(&mut ctx, NewUser::new("alice", "a@x.com")).unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let handler = p.compensator.dispatcher();
        let (global, local, user) = (global.clone(), local.clone(), user.clone());
        handles.push(tokio::spawn(async move {
            handler.on_receive(&global, &local, &DELETE_USER.into(), &[json!(user)])
        }));
    }

    let mut compensated = 0;
    for handle in handles {
        if handle.await.unwrap() == CompensationOutcome::Compensated {
            compensated += 1;
        }
    }
    assert_eq!(compensated, 1);
    assert_eq!(p.repository.delete_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_call_chains_keep_separate_identity() {
    let sender = Arc::new(RecordingSender::text());
    let p = Arc::new(participant(sender.clone()));

    let mut handles = Vec::new();
    for i in 0..16 {
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            let mut ctx = p.compensator.root_context();
            let global = ctx.global_tx_id().cloned().unwrap();
            p.service
                .add(&mut ctx, NewUser::new(&format!("user-{}", i), "x@x.com"))
                .unwrap();
            global
        }));
    }
    let mut globals = Vec::new();
    for handle in handles {
        globals.push(handle.await.unwrap());
    }

    let events = sender.events();
    assert_eq!(events.len(), 32);
    for global in &globals {
        let mine: Vec<&TxEvent> = events.iter().filter(|e| e.global_tx_id() == global).collect();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].event_type(), EventType::Started);
        assert_eq!(mine[1].event_type(), EventType::Ended);
        assert_eq!(mine[0].local_tx_id(), mine[1].local_tx_id());
    }
    assert_eq!(p.compensator.registry().len(), 16);
}
