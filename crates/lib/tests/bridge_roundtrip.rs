//! Integration test: run the bridge against a fake SMSC (plain TCP speaking SMPP) and a
//! mocked Telegram Bot API, then drive both directions through it.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use smsbridge::config::Config;
use smsbridge::gateway;
use smsbridge::smpp::pdu::FINAL_DELIVERY_RECEIPT;
use smsbridge::smpp::{Body, MessageFields, Pdu, PduCodec};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;

type Smsc = Framed<TcpStream, PduCodec>;

/// Next request from the bridge, answering keep-alives on the way.
async fn next_request(smsc: &mut Smsc) -> Pdu {
    loop {
        let pdu = tokio::time::timeout(Duration::from_secs(5), smsc.next())
            .await
            .expect("bridge sent nothing within 5s")
            .expect("bridge closed the SMPP connection")
            .expect("valid pdu");
        if pdu.body == Body::EnquireLink {
            smsc.send(Pdu::new(pdu.sequence, Body::EnquireLinkResp))
                .await
                .unwrap();
            continue;
        }
        return pdu;
    }
}

async fn post_submit(client: &reqwest::Client, url: &str) -> (u16, String) {
    let resp = client
        .post(url)
        .form(&[("src", "A"), ("dst", "B"), ("text", "hi")])
        .send()
        .await
        .expect("gateway reachable");
    let status = resp.status().as_u16();
    (status, resp.text().await.unwrap())
}

#[tokio::test]
async fn bridge_relays_and_submits() {
    let mut telegram = mockito::Server::new_async().await;
    let relayed = telegram
        .mock("POST", "/bot1:key/sendMessage")
        .match_body(mockito::Matcher::Regex(
            r#"name="text"\r\n\r\nSMS from 12345 to 999 :\nhello"#.to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"ok":true}"#)
        .expect(1)
        .create_async()
        .await;

    let smsc_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", http_listener.local_addr().unwrap());

    let config = Config {
        botid: "1".into(),
        botkey: "key".into(),
        chatid: "-100".into(),
        smpp: smsc_listener.local_addr().unwrap().to_string(),
        username: "user".into(),
        password: "secret".into(),
        telegramapi: Some(telegram.url()),
        debug: 3,
        ..Default::default()
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let bridge = tokio::spawn(gateway::serve_bridge(config, http_listener, async {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();

    // TCP is up but the bind is unanswered: submissions are refused with 503.
    let (stream, _) = smsc_listener.accept().await.unwrap();
    let mut smsc = Framed::new(stream, PduCodec);
    let bind = next_request(&mut smsc).await;
    assert!(matches!(bind.body, Body::BindTransceiver(_)));
    let (status, _) = post_submit(&client, &url).await;
    assert_eq!(status, 503);

    smsc.send(Pdu::new(
        bind.sequence,
        Body::BindTransceiverResp {
            system_id: "fake".into(),
        },
    ))
    .await
    .unwrap();

    // Outbound: HTTP form -> submit_sm -> message id in the HTTP body. Retry until the
    // session has published its link.
    let mut answered = None;
    for _ in 0..50 {
        let submit = tokio::spawn({
            let client = client.clone();
            let url = url.clone();
            async move { post_submit(&client, &url).await }
        });
        let req = tokio::time::timeout(Duration::from_millis(200), next_request(&mut smsc)).await;
        match req {
            Ok(req) => {
                let Body::SubmitSm(ref fields) = req.body else {
                    panic!("expected submit_sm, got {:?}", req.body);
                };
                assert_eq!(fields.source_addr, "A");
                assert_eq!(fields.destination_addr, "B");
                assert_eq!(&fields.short_message[..], b"hi");
                assert_eq!(fields.registered_delivery, FINAL_DELIVERY_RECEIPT);
                smsc.send(Pdu::new(
                    req.sequence,
                    Body::SubmitSmResp {
                        message_id: "42".into(),
                    },
                ))
                .await
                .unwrap();
                answered = Some(submit.await.unwrap());
                break;
            }
            Err(_) => {
                let (status, _) = submit.await.unwrap();
                assert_eq!(status, 503);
            }
        }
    }
    assert_eq!(answered, Some((200, "42".to_string())));

    // Inbound: deliver_sm -> deliver_sm_resp, and the text is relayed to Telegram.
    smsc.send(Pdu::new(
        500,
        Body::DeliverSm(MessageFields {
            source_addr: "12345".into(),
            destination_addr: "999".into(),
            short_message: Bytes::from_static(b"hello"),
            ..Default::default()
        }),
    ))
    .await
    .unwrap();
    let resp = next_request(&mut smsc).await;
    assert!(matches!(resp.body, Body::DeliverSmResp { .. }));
    assert_eq!(resp.sequence, 500);

    let mut hit = false;
    for _ in 0..100 {
        if relayed.matched_async().await {
            hit = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(hit, "relay request did not reach the Telegram mock within 5s");

    // Shutdown unbinds the session and returns cleanly.
    stop_tx.send(()).unwrap();
    let unbind = next_request(&mut smsc).await;
    assert_eq!(unbind.body, Body::Unbind);
    smsc.send(Pdu::new(unbind.sequence, Body::UnbindResp))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), bridge)
        .await
        .expect("bridge stopped within 5s")
        .unwrap()
        .unwrap();
}
