use std::time::Duration;

use bytes::Bytes;
use scbridge::osc::{decode_message, encode_bundle, encode_message};
use scbridge::{
    OscBundle, OscMessage, OscPacket, OscValue, RpcClient, RpcConfig, RpcError, TimeTag,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

fn new_client(config: RpcConfig) -> (RpcClient, mpsc::UnboundedReceiver<Bytes>) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (RpcClient::new(config, outbound_tx), outbound_rx)
}

/// Decode the next outbound datagram as a single message.
fn next_outbound(outbound: &mut mpsc::UnboundedReceiver<Bytes>) -> OscMessage {
    let datagram = outbound.try_recv().expect("datagram sent");
    decode_message(&datagram).expect("well-formed outbound datagram")
}

fn arg_str(message: &OscMessage, index: usize) -> String {
    message.args[index]
        .as_str()
        .expect("string argument")
        .to_string()
}

fn reply_datagram(address: &str, id: &str, body: &str) -> Bytes {
    let message = OscMessage::new(
        address,
        vec![
            OscValue::Str(id.to_string()),
            OscValue::Str(body.to_string()),
        ],
    )
    .unwrap();
    encode_message(&message).unwrap()
}

#[tokio::test]
async fn call_sends_request_and_resolves_on_reply() {
    let (client, mut outbound) = new_client(RpcConfig::default());

    let pending = client
        .call("/server/status", &json!({"detail": true}))
        .unwrap();
    assert_eq!(client.pending_count(), 1);

    let request = next_outbound(&mut outbound);
    assert_eq!(request.address, "/API/call");
    let id = arg_str(&request, 0);
    assert_eq!(arg_str(&request, 1), "/server/status");
    assert_eq!(
        serde_json::from_str::<Value>(&arg_str(&request, 2)).unwrap(),
        json!({"detail": true})
    );

    client.ingest_datagram(&reply_datagram("/API/reply", &id, "{\"peak\":0.5}"));
    assert_eq!(pending.await.unwrap().unwrap(), json!({"peak": 0.5}));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn error_and_not_found_replies_reject_the_call() {
    let (client, mut outbound) = new_client(RpcConfig::default());

    let pending = client.call("/missing", &Value::Null).unwrap();
    let id = arg_str(&next_outbound(&mut outbound), 0);

    client.ingest_datagram(&reply_datagram("/API/not_found", &id, "no such path"));
    let err = pending.await.unwrap().unwrap_err();
    match err {
        RpcError::ErrorReply { address, message } => {
            assert_eq!(address, "/API/not_found");
            assert_eq!(message, "no such path");
        }
        other => panic!("expected error reply, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_payloads_go_out_as_ordered_fragments() {
    let config = RpcConfig {
        fragment_payload_limit: 16,
        fragment_ttl: Duration::from_secs(30),
    };
    let (client, mut outbound) = new_client(config);

    let args = json!({"samples": "0123456789012345678901234567890123456789"});
    let expected_json = args.to_string();
    let _pending = client.call("/buffer/load", &args).unwrap();

    let mut rebuilt = Vec::new();
    while let Ok(datagram) = outbound.try_recv() {
        let request = decode_message(&datagram).unwrap();
        assert_eq!(request.address, "/API/call");
        assert_eq!(arg_str(&request, 1), "/buffer/load");
        let compound = arg_str(&request, 0);
        let (prefix, base) = compound.split_once(':').expect("compound id");
        let (index, count) = prefix.split_once(',').expect("index,count prefix");
        rebuilt.push((
            index.parse::<usize>().unwrap(),
            count.parse::<usize>().unwrap(),
            base.to_string(),
            arg_str(&request, 2),
        ));
    }

    let count = rebuilt[0].1;
    assert_eq!(rebuilt.len(), count);
    assert!(rebuilt.iter().all(|(_, c, _, _)| *c == count));
    assert!(rebuilt.iter().all(|(_, _, base, _)| *base == rebuilt[0].2));
    assert!(rebuilt.iter().all(|(_, _, _, piece)| piece.len() <= 16));

    rebuilt.sort_by_key(|(index, ..)| *index);
    let joined: String = rebuilt.into_iter().map(|(_, _, _, piece)| piece).collect();
    assert_eq!(joined, expected_json);
}

#[tokio::test]
async fn inbound_fragments_reassemble_out_of_order() {
    let (client, mut outbound) = new_client(RpcConfig::default());

    let pending = client.call("/node/query", &Value::Null).unwrap();
    let id = arg_str(&next_outbound(&mut outbound), 0);

    let body = "{\"nodes\":[1,2,3]}";
    let pieces = ["{\"nodes\"", ":[1,2", ",3]}"];
    for index in [2usize, 0, 1] {
        let compound = format!("{index},3:{id}");
        client.ingest_datagram(&reply_datagram("/API/reply", &compound, pieces[index]));
    }

    assert_eq!(
        pending.await.unwrap().unwrap(),
        serde_json::from_str::<Value>(body).unwrap()
    );
}

#[tokio::test]
async fn stale_incomplete_fragment_groups_are_evicted() {
    let config = RpcConfig {
        fragment_payload_limit: 7168,
        fragment_ttl: Duration::from_millis(30),
    };
    let (client, mut outbound) = new_client(config);

    let mut pending = client.call("/node/query", &Value::Null).unwrap();
    let id = arg_str(&next_outbound(&mut outbound), 0);

    client.ingest_datagram(&reply_datagram(
        "/API/reply",
        &format!("0,2:{id}"),
        "{\"nodes\"",
    ));
    tokio::time::sleep(Duration::from_millis(60)).await;

    // the sweep on the next ingest drops the stale half-group, so this
    // closing fragment opens a fresh incomplete group instead of resolving
    client.ingest_datagram(&reply_datagram(
        "/API/reply",
        &format!("1,2:{id}"),
        ":[1]}",
    ));

    assert_eq!(client.pending_count(), 1);
    assert!(matches!(
        pending.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn unparseable_reply_bodies_degrade_to_raw_strings() {
    let (client, mut outbound) = new_client(RpcConfig::default());

    let pending = client.call("/server/version", &Value::Null).unwrap();
    let id = arg_str(&next_outbound(&mut outbound), 0);

    client.ingest_datagram(&reply_datagram("/API/reply", &id, "scsynth 3.13"));
    assert_eq!(
        pending.await.unwrap().unwrap(),
        Value::String("scsynth 3.13".to_string())
    );
}

#[tokio::test]
async fn bundled_replies_are_unwrapped() {
    let (client, mut outbound) = new_client(RpcConfig::default());

    let pending = client.call("/server/status", &Value::Null).unwrap();
    let id = arg_str(&next_outbound(&mut outbound), 0);

    let reply = OscMessage::new(
        "/API/reply",
        vec![OscValue::Str(id), OscValue::Str("42".to_string())],
    )
    .unwrap();
    let bundle = OscBundle {
        time_tag: TimeTag::IMMEDIATE,
        elements: vec![OscPacket::Message(reply)],
    };
    client.ingest_datagram(&encode_bundle(&bundle).unwrap());

    assert_eq!(pending.await.unwrap().unwrap(), json!(42));
}

#[tokio::test]
async fn unknown_ids_and_garbage_datagrams_are_tolerated() {
    let (client, mut outbound) = new_client(RpcConfig::default());

    let _pending = client.call("/server/status", &Value::Null).unwrap();
    let _ = next_outbound(&mut outbound);

    client.ingest_datagram(&reply_datagram("/API/reply", "never-issued", "{}"));
    client.ingest_datagram(b"not osc at all");
    client.ingest_datagram(&[]);

    assert_eq!(client.pending_count(), 1);
}

#[tokio::test]
async fn shutdown_rejects_every_pending_call() {
    let (client, mut outbound) = new_client(RpcConfig::default());

    let first = client.call("/a", &Value::Null).unwrap();
    let second = client.call("/b", &Value::Null).unwrap();
    let _ = next_outbound(&mut outbound);
    let _ = next_outbound(&mut outbound);

    client.shutdown();
    assert_eq!(client.pending_count(), 0);
    assert!(matches!(first.await.unwrap(), Err(RpcError::Shutdown)));
    assert!(matches!(second.await.unwrap(), Err(RpcError::Shutdown)));
}

#[tokio::test]
async fn closed_outbound_channel_surfaces_immediately() {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    drop(outbound_rx);
    let client = RpcClient::new(RpcConfig::default(), outbound_tx);

    let err = client.call("/server/status", &Value::Null).unwrap_err();
    assert!(matches!(err, RpcError::ChannelClosed));
    assert_eq!(client.pending_count(), 0);
}
