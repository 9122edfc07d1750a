//! 分发器集成测试：录制通道 + 脚本化后端 + 内存暂停状态库

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_relay::core::{RelayError, RetryPolicy};
use chat_relay::exporter::{DatasetExporter, DatasetFile};
use chat_relay::llm::MockBackend;
use chat_relay::memory::Turn;
use chat_relay::relay::dispatcher::{OOPS, PAUSE_ACK, RESUME_ACK};
use chat_relay::relay::{Command, Outcome};
use chat_relay::store::{FreezeStore, MemoryFreezeStore, SqliteFreezeStore};
use chat_relay::{Dispatcher, DispatcherSettings, Message, MessageKind, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Text(String, String),
    Image(String, Vec<u8>),
    SelfText(String),
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    /// 剩余需要失败的文本发送次数
    fail_text: Mutex<usize>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(_, text) | Sent::SelfText(text) => Some(text),
                Sent::Image(..) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn reply_text(&self, msg: &Message, text: &str) -> Result<(), RelayError> {
        {
            let mut fail = self.fail_text.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(RelayError::transport("send failed"));
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Text(msg.sender_id.clone(), text.to_string()));
        Ok(())
    }

    async fn reply_image(&self, msg: &Message, image: Vec<u8>) -> Result<(), RelayError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Image(msg.sender_id.clone(), image));
        Ok(())
    }

    async fn send_text_to_self(&self, text: &str) -> Result<(), RelayError> {
        self.sent.lock().unwrap().push(Sent::SelfText(text.to_string()));
        Ok(())
    }

    async fn send_image_to_self(&self, image: Vec<u8>) -> Result<(), RelayError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Image("self".to_string(), image));
        Ok(())
    }

    async fn fetch_voice(&self, _msg: &Message) -> Result<Vec<u8>, RelayError> {
        Err(RelayError::transport("no voice"))
    }
}

/// 写一行样本到临时文件的导出器
struct StubExporter {
    dir: PathBuf,
}

#[async_trait]
impl DatasetExporter for StubExporter {
    async fn generate_dataset(&self, keyword: &str) -> Result<DatasetFile, RelayError> {
        let path = self.dir.join("stub_ds.jsonl");
        std::fs::write(&path, format!("{{\"prompt\":\"{}\",\"completion\":\"ok\"}}\n", keyword))?;
        Ok(DatasetFile::new(path))
    }
}

/// 读写都失败的暂停状态库
struct BrokenStore;

#[async_trait]
impl FreezeStore for BrokenStore {
    async fn is_paused(&self, _id: &str) -> Result<bool, RelayError> {
        Err(RelayError::Io(std::io::Error::other("disk gone")))
    }

    async fn pause(&self, _id: &str) -> Result<(), RelayError> {
        Err(RelayError::Io(std::io::Error::other("disk gone")))
    }

    async fn resume(&self, _id: &str) -> Result<(), RelayError> {
        Err(RelayError::Io(std::io::Error::other("disk gone")))
    }
}

fn with_store(store: Arc<dyn FreezeStore>) -> (Dispatcher, Arc<MockBackend>, Arc<RecordingTransport>) {
    let backend = Arc::new(MockBackend::new());
    let transport = Arc::new(RecordingTransport::default());
    let settings = DispatcherSettings {
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        ..DispatcherSettings::default()
    };
    let dispatcher = Dispatcher::new(
        backend.clone(),
        transport.clone(),
        store,
        Arc::new(StubExporter {
            dir: std::env::temp_dir(),
        }),
        settings,
    );
    (dispatcher, backend, transport)
}

struct Harness {
    dispatcher: Dispatcher,
    backend: Arc<MockBackend>,
    transport: Arc<RecordingTransport>,
    store: Arc<MemoryFreezeStore>,
    _dir: tempfile::TempDir,
}

fn harness(backend: MockBackend) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend);
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(MemoryFreezeStore::default());
    let settings = DispatcherSettings {
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        ..DispatcherSettings::default()
    };
    let dispatcher = Dispatcher::new(
        backend.clone(),
        transport.clone(),
        store.clone(),
        Arc::new(StubExporter {
            dir: dir.path().to_path_buf(),
        }),
        settings,
    );
    Harness {
        dispatcher,
        backend,
        transport,
        store,
        _dir: dir,
    }
}

fn quote(quoted: &str, trailer: &str) -> String {
    format!("「Alice：{}」\n- - - - - - - - - - - - - - -\n{}", quoted, trailer)
}

#[tokio::test]
async fn test_hello_round_trip_sends_seeded_context() {
    let backend = MockBackend::new();
    backend.push_completion(Ok("  Hi there!  "));
    let h = harness(backend);

    let outcome = h.dispatcher.handle(Message::text("alice", "Hello")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(MessageKind::Text));

    let calls = h.backend.complete_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 3);
    assert_eq!(calls[0][2], Turn::user("Hello"));
    assert_eq!(calls[0][1], Turn::system("Please use chinese."));

    assert_eq!(
        h.transport.sent(),
        vec![Sent::Text("alice".to_string(), "Hi there!".to_string())]
    );

    let session = h.dispatcher.sessions().get("alice").await.unwrap();
    let turns = session.lock().await.turns().to_vec();
    assert_eq!(turns.last().unwrap(), &Turn::assistant("Hi there!"));
}

#[tokio::test]
async fn test_pause_silences_until_resume() {
    let h = harness(MockBackend::new());

    let outcome = h.dispatcher.handle(Message::text("bob", " STOP ")).await.unwrap();
    assert_eq!(outcome, Outcome::Command(Command::Pause));
    assert!(h.store.is_paused("bob").await.unwrap());
    assert_eq!(h.transport.texts(), vec![PAUSE_ACK.to_string()]);

    for msg in [
        Message::text("bob", "hello?"),
        Message::text("bob", "").with_kind(MessageKind::Image),
        Message::text("bob", "画一张图"),
    ] {
        assert_eq!(h.dispatcher.handle(msg).await.unwrap(), Outcome::Frozen);
    }
    assert_eq!(h.transport.sent().len(), 1);
    assert!(h.backend.complete_calls().is_empty());
    assert_eq!(h.backend.image_requests(), 0);

    // 其他联系人不受影响
    h.dispatcher.handle(Message::text("carol", "hi")).await.unwrap();
    assert_eq!(h.backend.complete_calls().len(), 1);

    let outcome = h.dispatcher.handle(Message::text("bob", "继续")).await.unwrap();
    assert_eq!(outcome, Outcome::Command(Command::Resume));
    assert!(!h.store.is_paused("bob").await.unwrap());

    h.dispatcher.handle(Message::text("bob", "back")).await.unwrap();
    let texts = h.transport.texts();
    assert_eq!(texts[texts.len() - 2], RESUME_ACK);
    assert_eq!(texts[texts.len() - 1], "Echo from Mock: back");
}

#[tokio::test]
async fn test_backend_failure_yields_single_fallback() {
    let backend = MockBackend::new();
    for _ in 0..3 {
        backend.push_completion(Err("503"));
    }
    let h = harness(backend);

    h.dispatcher.on_message(Message::text("dave", "hello")).await;

    assert_eq!(h.backend.complete_calls().len(), 3);
    assert_eq!(h.transport.texts(), vec![OOPS.to_string()]);
}

#[tokio::test]
async fn test_transient_send_failure_is_retried() {
    let h = harness(MockBackend::new());
    *h.transport.fail_text.lock().unwrap() = 2;

    h.dispatcher.handle(Message::text("erin", "ping")).await.unwrap();
    assert_eq!(h.transport.texts(), vec!["Echo from Mock: ping".to_string()]);
}

#[tokio::test]
async fn test_image_fan_out_skips_failed_downloads() {
    let backend = MockBackend::new().with_images(vec![
        ("https://img/1", Some(vec![1])),
        ("https://img/2", None),
        ("https://img/3", Some(vec![3])),
    ]);
    let h = harness(backend);

    let msg = Message::text("frank", "画一张猫的图");
    let handle = h.dispatcher.handle_image(&msg).await.unwrap();
    assert_eq!(handle.len(), 3);
    assert_eq!(handle.join().await, 2);

    let mut images: Vec<Vec<u8>> = h
        .transport
        .sent()
        .into_iter()
        .filter_map(|s| match s {
            Sent::Image(to, bytes) if to == "frank" => Some(bytes),
            _ => None,
        })
        .collect();
    images.sort();
    assert_eq!(images, vec![vec![1], vec![3]]);
    assert!(h.backend.complete_calls().is_empty());
}

#[tokio::test]
async fn test_image_keyword_routes_away_from_chat() {
    let h = harness(MockBackend::new());
    let outcome = h.dispatcher.handle(Message::text("gina", "发张照片")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(MessageKind::Text));
    assert_eq!(h.backend.image_requests(), 1);
    assert!(h.backend.complete_calls().is_empty());
}

#[tokio::test]
async fn test_filtered_messages_touch_nothing() {
    let h = harness(MockBackend::new());

    let mut group = Message::text("room", "stop");
    group.is_group = true;
    let mut echo = Message::text("me", "hello");
    echo.is_self_sent = true;
    echo.receiver_nickname = "Alice".to_string();
    let status = Message::text("x", "hi").with_kind(MessageKind::StatusNotify);

    for msg in [group, echo, status] {
        assert_eq!(h.dispatcher.handle(msg).await.unwrap(), Outcome::Rejected);
    }
    assert!(h.transport.sent().is_empty());
    assert!(h.store.keys().is_empty());
    assert!(h.backend.complete_calls().is_empty());
}

#[tokio::test]
async fn test_quote_ref_resubmits_quoted_text() {
    let h = harness(MockBackend::new());
    h.dispatcher
        .handle(Message::text("hank", quote("Bob", "ref")))
        .await
        .unwrap();

    let calls = h.backend.complete_calls();
    assert_eq!(calls[0].last().unwrap(), &Turn::user("Bob"));
    assert_eq!(h.transport.texts(), vec!["Echo from Mock: Bob".to_string()]);
}

#[tokio::test]
async fn test_quote_with_new_text_sends_only_that_text() {
    let h = harness(MockBackend::new());
    h.dispatcher
        .handle(Message::text("hank", quote("Bob", "hello")))
        .await
        .unwrap();

    let calls = h.backend.complete_calls();
    assert_eq!(calls[0].last().unwrap(), &Turn::user("hello"));
}

#[tokio::test]
async fn test_fine_tune_flow_uploads_and_reports() {
    let h = harness(MockBackend::new());

    let outcome = h
        .dispatcher
        .handle(Message::text("ivy", "create fine tune"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Command(Command::ExportDataset));

    let uploads = h.backend.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].contains("\"prompt\":\"keyword\""));

    assert_eq!(
        h.transport.texts(),
        vec![
            "上传成功\nName: ivy_ft_ds.json\nID: file-1".to_string(),
            "fine tuning is started\nID: ftjob-ivy\nCreated fine-tuning job from file-1".to_string(),
        ]
    );
    assert!(!h._dir.path().join("stub_ds.jsonl").exists());

    h.dispatcher
        .handle(Message::text("ivy", "list fine tune"))
        .await
        .unwrap();
    let texts = h.transport.texts();
    let listed: serde_json::Value = serde_json::from_str(texts.last().unwrap()).unwrap();
    assert_eq!(listed[0]["id"], "ftjob-ivy");

    // 指令不进入会话
    assert!(h.dispatcher.sessions().get("ivy").await.is_none());
}

#[tokio::test]
async fn test_concurrent_messages_keep_sessions_apart() {
    let h = harness(MockBackend::new());
    let dispatcher = Arc::new(h.dispatcher);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let msg = Message::text(format!("user{}", i % 2), format!("m{}", i));
        tasks.push(dispatcher.spawn(msg));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for user in ["user0", "user1"] {
        let session = dispatcher.sessions().get(user).await.unwrap();
        let turns = session.lock().await.turns().to_vec();
        // 2 条种子 + 4 问 4 答
        assert_eq!(turns.len(), 10);
        let users: Vec<&Turn> = turns.iter().filter(|t| t.content.starts_with('m')).collect();
        assert_eq!(users.len(), 4);
    }
    assert_eq!(h.transport.texts().len(), 8);
}

#[tokio::test]
async fn test_store_write_failure_sends_no_ack() {
    let (dispatcher, _backend, transport) = with_store(Arc::new(BrokenStore));

    assert!(dispatcher.handle(Message::text("kim", "stop")).await.is_err());
    assert!(dispatcher.handle(Message::text("kim", "start")).await.is_err());
    assert!(transport.sent().is_empty());

    dispatcher.on_message(Message::text("kim", "暂停")).await;
    let texts = transport.texts();
    assert!(!texts.iter().any(|t| t == PAUSE_ACK));
    assert_eq!(texts, vec![OOPS.to_string()]);
}

#[tokio::test]
async fn test_store_read_failure_is_not_treated_as_active() {
    let (dispatcher, backend, transport) = with_store(Arc::new(BrokenStore));

    dispatcher.on_message(Message::text("lee", "hello")).await;

    assert!(backend.complete_calls().is_empty());
    assert_eq!(transport.texts(), vec![OOPS.to_string()]);
}

#[tokio::test]
async fn test_closed_sqlite_store_fails_messages() {
    let store = Arc::new(SqliteFreezeStore::open_in_memory().unwrap());
    store.close().await.unwrap();
    let (dispatcher, backend, transport) = with_store(store);

    dispatcher.on_message(Message::text("mia", "hello")).await;

    assert!(backend.complete_calls().is_empty());
    assert_eq!(transport.texts(), vec![OOPS.to_string()]);
}
