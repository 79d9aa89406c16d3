//! 세션 요청 흐름 테스트 (스크립트 연결기 사용)

mod common;

use common::*;
use sft::crypto::{SessionCipher, SessionKey, PUBLIC_KEY_SIZE};
use sft::frame::RequestHeader;
use sft::message::get_fixed_str;
use sft::{
    checksum, ClientId, Error, Identity, RequestCode, ResponseCode, Session, SessionState,
    TransferOutcome, MESSAGE_SIZE, NAME_SIZE,
};

const SESSION_KEY: [u8; 16] = [0x42; 16];

fn new_session(identity: Identity) -> (Session<ScriptedConnector>, ScriptedConnector, MemoryStore) {
    let connector = ScriptedConnector::new();
    let store = MemoryStore::default();
    let session = Session::new(
        connector.clone(),
        Box::new(store.clone()),
        identity,
        test_keys(),
        3,
    );
    (session, connector, store)
}

/// CONNECT까지 마친 세션
fn established_session(client_id: ClientId) -> (Session<ScriptedConnector>, ScriptedConnector) {
    let (mut session, connector, _) =
        new_session(Identity::registered("bob", client_id).unwrap());
    let public = session.keys().public_key_der().to_vec();
    connector.push_response(key_delivery(
        ResponseCode::RsaReceived,
        client_id,
        &public,
        &SESSION_KEY,
    ));
    session.connect(false).unwrap();
    (session, connector)
}

#[test]
fn test_register_uses_zero_client_id() {
    let (mut session, connector, store) = new_session(Identity::new("alice").unwrap());
    assert_eq!(session.state(), SessionState::Unregistered);

    let assigned = ClientId::new([7; 16]);
    connector.push_response(reg_success(assigned));

    assert_eq!(session.register().unwrap(), assigned);
    assert_eq!(session.state(), SessionState::Registered);
    assert_eq!(session.client_id(), Some(assigned));

    let sent = connector.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), MESSAGE_SIZE);

    let header = RequestHeader::decode(&sent[0]).unwrap();
    assert!(header.client_id.is_zero());
    assert_eq!(header.version, 3);
    assert_eq!(header.code, u16::from(RequestCode::Register));
    assert_eq!(header.payload_size, NAME_SIZE as u32);

    let mut payload = request_payload(&sent[0]);
    assert_eq!(get_fixed_str(&mut payload, NAME_SIZE), "alice");

    let saved = store.saved.borrow();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].client_id(), Some(assigned));
}

#[test]
fn test_register_rejected() {
    let (mut session, connector, store) = new_session(Identity::new("alice").unwrap());
    connector.push_response(response_frame(ResponseCode::RegFailed, &[]));

    let err = session.register().unwrap_err();
    assert!(matches!(
        err,
        Error::Rejected {
            code: ResponseCode::RegFailed
        }
    ));
    assert_eq!(session.state(), SessionState::Unregistered);
    assert!(store.saved.borrow().is_empty());
}

#[test]
fn test_register_unexpected_code() {
    let (mut session, connector, _) = new_session(Identity::new("alice").unwrap());
    connector.push_response(response_frame(ResponseCode::GeneralServerErr, &[]));

    assert!(matches!(
        session.register(),
        Err(Error::UnexpectedResponse { got: 2107, .. })
    ));
}

#[test]
fn test_register_connection_closed() {
    let (mut session, _connector, _) = new_session(Identity::new("alice").unwrap());
    // 응답 없이 닫힘
    assert!(matches!(session.register(), Err(Error::Io(_))));
    assert_eq!(session.state(), SessionState::Unregistered);
}

#[test]
fn test_register_truncated_response_commits_nothing() {
    let (mut session, connector, store) = new_session(Identity::new("alice").unwrap());
    // 헤더 + ID 앞 5바이트만 오고 닫힘
    let mut truncated = reg_success(ClientId::new([0xAB; 16]));
    truncated.truncate(7 + 5);
    connector.push_response(truncated);

    assert!(matches!(session.register(), Err(Error::Io(_))));
    assert_eq!(session.state(), SessionState::Unregistered);
    assert_eq!(session.client_id(), None);
    assert_eq!(store.saved.borrow().len(), 0);
}

#[test]
fn test_register_save_failure_keeps_unregistered() {
    let connector = ScriptedConnector::new();
    let mut session = Session::new(
        connector.clone(),
        Box::new(FailingStore),
        Identity::new("alice").unwrap(),
        test_keys(),
        3,
    );
    connector.push_response(reg_success(ClientId::new([7; 16])));

    let err = session.register().unwrap_err();
    assert!(matches!(err, Error::LocalFile { .. }));
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::Unregistered);
    assert_eq!(session.client_id(), None);
}

#[test]
fn test_connect_key_exchange() {
    let client_id = ClientId::new([3; 16]);
    let (session, connector) = established_session(client_id);

    assert_eq!(session.state(), SessionState::KeyEstablished);
    assert_eq!(session.session_key(), Some(&SessionKey::new(SESSION_KEY)));

    let sent = connector.sent();
    let header = RequestHeader::decode(&sent[0]).unwrap();
    assert_eq!(header.client_id, client_id);
    assert_eq!(header.code, u16::from(RequestCode::Connect));
    assert_eq!(header.payload_size, (NAME_SIZE + PUBLIC_KEY_SIZE) as u32);

    let payload = request_payload(&sent[0]);
    assert_eq!(
        &payload[NAME_SIZE..NAME_SIZE + PUBLIC_KEY_SIZE],
        session.keys().public_key_der()
    );
    // 선언 크기 뒤는 0
    assert!(payload[NAME_SIZE + PUBLIC_KEY_SIZE..].iter().all(|&b| b == 0));
}

#[test]
fn test_reconnect_sends_name_only() {
    let client_id = ClientId::new([4; 16]);
    let (mut session, connector, _) =
        new_session(Identity::registered("carol", client_id).unwrap());
    assert_eq!(session.state(), SessionState::Registered);

    let public = session.keys().public_key_der().to_vec();
    connector.push_response(key_delivery(
        ResponseCode::ReconnectAccepted,
        client_id,
        &public,
        &SESSION_KEY,
    ));
    session.connect(true).unwrap();
    assert_eq!(session.state(), SessionState::KeyEstablished);

    let sent = connector.sent();
    let header = RequestHeader::decode(&sent[0]).unwrap();
    assert_eq!(header.code, u16::from(RequestCode::Reconnect));
    assert_eq!(header.payload_size, NAME_SIZE as u32);
    assert!(request_payload(&sent[0])[NAME_SIZE..].iter().all(|&b| b == 0));
}

#[test]
fn test_reconnect_denied() {
    let client_id = ClientId::new([4; 16]);
    let (mut session, connector, _) =
        new_session(Identity::registered("carol", client_id).unwrap());
    connector.push_response(response_frame(
        ResponseCode::ReconnectDenied,
        client_id.as_bytes(),
    ));

    assert!(matches!(
        session.connect(true),
        Err(Error::Rejected {
            code: ResponseCode::ReconnectDenied
        })
    ));
    assert_eq!(session.state(), SessionState::Registered);
    assert!(session.session_key().is_none());
}

#[test]
fn test_connect_client_id_mismatch() {
    let client_id = ClientId::new([5; 16]);
    let (mut session, connector, _) =
        new_session(Identity::registered("dave", client_id).unwrap());
    let public = session.keys().public_key_der().to_vec();
    connector.push_response(key_delivery(
        ResponseCode::RsaReceived,
        ClientId::new([6; 16]),
        &public,
        &SESSION_KEY,
    ));

    assert!(matches!(
        session.connect(false),
        Err(Error::ClientIdMismatch { .. })
    ));
    assert!(session.session_key().is_none());
}

#[test]
fn test_connect_requires_registration() {
    let (mut session, connector, _) = new_session(Identity::new("erin").unwrap());
    assert!(matches!(
        session.connect(false),
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(connector.connects(), 0);
}

#[test]
fn test_send_requires_session_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hello").unwrap();

    let (mut session, connector, _) =
        new_session(Identity::registered("frank", ClientId::new([1; 16])).unwrap());
    assert!(matches!(
        session.send_file(&path),
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(connector.connects(), 0);
}

#[test]
fn test_transfer_chunks_and_padding() {
    let client_id = ClientId::new([8; 16]);
    let (mut session, connector) = established_session(client_id);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.bin");
    let plaintext: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &plaintext).unwrap();

    let cipher = SessionCipher::new(SessionKey::new(SESSION_KEY));
    let content_size = cipher.encrypt(&plaintext).len();
    assert_eq!(content_size, 2512);

    connector.push_response(crc_report(
        client_id,
        content_size as u32,
        "report.bin",
        checksum(&plaintext),
    ));

    assert_eq!(session.send_file(&path).unwrap(), checksum(&plaintext));
    assert_eq!(session.state(), SessionState::Done);

    let sent = connector.sent();
    let upload = &sent[1];
    // 헤더 프레임 + 본문 3조각
    assert_eq!(upload.len(), MESSAGE_SIZE * 4);

    let header = RequestHeader::decode(upload).unwrap();
    assert_eq!(header.code, u16::from(RequestCode::Send));
    assert_eq!(header.payload_size, content_size as u32 + 259);

    let mut payload = request_payload(upload);
    assert_eq!(
        u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
        content_size as u32
    );
    payload = &payload[4..];
    assert_eq!(get_fixed_str(&mut payload, NAME_SIZE), "report.bin");

    let body = &upload[MESSAGE_SIZE..];
    assert!(body[content_size..].iter().all(|&b| b == 0));
    assert_eq!(cipher.decrypt(&body[..content_size]).unwrap(), plaintext);
}

#[test]
fn test_transfer_exact_chunk_multiple() {
    let client_id = ClientId::new([10; 16]);
    let (mut session, connector) = established_session(client_id);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exact.bin");
    let plaintext: Vec<u8> = (0..1008u32).map(|i| (i % 199) as u8).collect();
    std::fs::write(&path, &plaintext).unwrap();

    let cipher = SessionCipher::new(SessionKey::new(SESSION_KEY));
    let content_size = cipher.encrypt(&plaintext).len();
    assert_eq!(content_size, MESSAGE_SIZE);

    connector.push_response(crc_report(
        client_id,
        content_size as u32,
        "exact.bin",
        checksum(&plaintext),
    ));

    assert_eq!(session.send_file(&path).unwrap(), checksum(&plaintext));

    let sent = connector.sent();
    let upload = &sent[1];
    // 헤더 프레임 + 본문 1조각, 빈 조각 없음
    assert_eq!(upload.len(), 2 * MESSAGE_SIZE);
    assert_eq!(cipher.decrypt(&upload[MESSAGE_SIZE..]).unwrap(), plaintext);
}

#[test]
fn test_transfer_checksum_mismatch() {
    let client_id = ClientId::new([9; 16]);
    let (mut session, connector) = established_session(client_id);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.txt");
    std::fs::write(&path, b"hello world\n").unwrap();

    connector.push_response(crc_report(client_id, 16, "small.txt", 12345));

    match session.send_file(&path) {
        Err(Error::ChecksumMismatch { expected, got }) => {
            assert_eq!(expected, 3733384285);
            assert_eq!(got, 12345);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    // 재시도 가능 상태로 복귀
    assert_eq!(session.state(), SessionState::KeyEstablished);
}

#[test]
fn test_transfer_missing_file_is_fatal() {
    let (mut session, connector) = established_session(ClientId::new([2; 16]));
    let dir = tempfile::tempdir().unwrap();

    let err = session.send_file(&dir.path().join("missing.bin")).unwrap_err();
    assert!(matches!(err, Error::LocalFile { .. }));
    assert!(err.is_fatal());
    // CONNECT 한 번뿐
    assert_eq!(connector.connects(), 1);
}

#[test]
fn test_notify_does_not_wait_for_response() {
    let client_id = ClientId::new([10; 16]);
    let (mut session, connector) = established_session(client_id);
    connector.push_response(response_frame(ResponseCode::MsgReceived, &[]));

    session
        .notify_outcome(TransferOutcome::Invalid, std::path::Path::new("/data/x.bin"))
        .unwrap();

    // 응답은 소비되지 않음
    assert_eq!(connector.pending_responses(), 1);

    let sent = connector.sent();
    let notify = &sent[1];
    assert_eq!(notify.len(), MESSAGE_SIZE);
    let header = RequestHeader::decode(notify).unwrap();
    assert_eq!(header.code, u16::from(RequestCode::InvalidCrc));
    assert_eq!(header.client_id, client_id);
    assert_eq!(header.payload_size, NAME_SIZE as u32);

    let mut payload = request_payload(notify);
    assert_eq!(get_fixed_str(&mut payload, NAME_SIZE), "x.bin");
}

#[test]
fn test_connection_refused_is_io_error() {
    let (mut session, connector, _) = new_session(Identity::new("gina").unwrap());
    connector.refuse_next(1);

    let err = session.register().unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!err.is_fatal());
}
