mod common;

use common::guard;
use ensemble::errors::{MessageTransformError, PortError};
use ensemble::interceptor::{self, InterceptorChain};
use ensemble::message::{Message, MIME_OCTET_STREAM};
use ensemble::port::{PortMode, PortSet};
use ensemble::receiver::ReceiverPolicy;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_fan_out_keeps_order_on_every_branch() {
    let mut producer = PortSet::new("producer");
    let mut left = PortSet::new("left");
    let mut right = PortSet::new("right");
    let out = producer.add_output("out").unwrap();
    let l = left.add_input("in", PortMode::Pull).unwrap();
    let r = right.add_input("in", PortMode::Pull).unwrap();
    out.connect(&l).unwrap();
    out.connect(&r).unwrap();
    assert_eq!(out.width(), 2);

    for i in 0..10 {
        out.send(Message::text(i.to_string())).await.unwrap();
    }
    out.set_finished();

    for input in [&l, &r] {
        let mut seen = Vec::new();
        loop {
            match guard(input.get(0)).await {
                Ok(message) => seen.push(message.body_text().unwrap().to_string()),
                Err(PortError::NoMoreTokens { .. }) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn test_interceptors_run_on_both_sides() {
    let mut producer = PortSet::new("producer");
    let mut consumer = PortSet::new("consumer");
    let out = producer.add_output("out").unwrap();
    let input = consumer.add_input("in", PortMode::Pull).unwrap();
    out.set_outbound(InterceptorChain::new().with_stage("tag", interceptor::set_header("stage", "outbound")))
        .unwrap();
    input
        .set_inbound(InterceptorChain::new().with_stage("upper", interceptor::map_text(|s| s.to_uppercase())))
        .unwrap();
    out.connect(&input).unwrap();

    out.send(Message::text("hello")).await.unwrap();
    let message = input.try_get(0).unwrap().unwrap();
    assert_eq!(message.body_text().unwrap(), "HELLO");
    assert_eq!(message.header("stage"), Some("outbound"));
}

#[tokio::test]
async fn test_failing_stage_stops_delivery() {
    let mut producer = PortSet::new("producer");
    let mut consumer = PortSet::new("consumer");
    let out = producer.add_output("out").unwrap();
    let input = consumer.add_input("in", PortMode::Pull).unwrap();
    out.set_outbound(
        InterceptorChain::new()
            .with_stage("text-only", interceptor::require_mime("text/plain"))
            .with_stage("never", |_: Message| -> Result<Message, MessageTransformError> {
                unreachable!("the chain short-circuits")
            }),
    )
    .unwrap();
    out.connect(&input).unwrap();

    let binary = Message::create(vec![0u8, 159, 146, 150], MIME_OCTET_STREAM).unwrap();
    let error = out.send(binary).await.unwrap_err();
    match error {
        PortError::Transform { source, .. } => assert_eq!(source.stage, "text-only"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(!input.has_any_token());
}

#[tokio::test]
async fn test_get_any_serves_every_channel() {
    let mut consumer = PortSet::new("consumer");
    let input = consumer.add_input("in", PortMode::Push).unwrap();
    let mut producers = Vec::new();
    for i in 0..3 {
        let mut set = PortSet::new(format!("p{}", i));
        let out = set.add_output("out").unwrap();
        out.connect(&input).unwrap();
        producers.push((set, out));
    }

    for (i, (_, out)) in producers.iter().enumerate() {
        out.send(Message::text(format!("from-{}", i))).await.unwrap();
        out.set_finished();
    }

    let mut seen = Vec::new();
    while let Ok(message) = guard(input.get_any()).await {
        seen.push(message.body_text().unwrap().to_string());
    }
    seen.sort();
    assert_eq!(seen, vec!["from-0", "from-1", "from-2"]);
    assert!(input.is_exhausted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bounded_send_waits_for_the_consumer() {
    let mut producer = PortSet::new("producer");
    let mut consumer = PortSet::new("consumer");
    let out = producer.add_output("out").unwrap();
    let input = consumer.add_input("in", PortMode::Pull).unwrap();
    input.set_receiver_policy(ReceiverPolicy::bounded(1)).unwrap();
    out.connect(&input).unwrap();

    out.send(Message::text("first")).await.unwrap();
    let blocked = tokio::spawn({
        let out = out.clone();
        async move { out.send(Message::text("second")).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    assert_eq!(input.try_get(0).unwrap().unwrap().body_text().unwrap(), "first");
    guard(blocked).await.unwrap().unwrap();
    assert_eq!(input.try_get(0).unwrap().unwrap().body_text().unwrap(), "second");
}

#[tokio::test]
async fn test_rejecting_policy_reports_full() {
    let mut producer = PortSet::new("producer");
    let mut consumer = PortSet::new("consumer");
    let out = producer.add_output("out").unwrap();
    let input = consumer.add_input("in", PortMode::Pull).unwrap();
    input.set_receiver_policy(ReceiverPolicy::rejecting(2)).unwrap();
    out.connect(&input).unwrap();

    out.send(Message::text("1")).await.unwrap();
    out.send(Message::text("2")).await.unwrap();
    assert!(matches!(
        out.send(Message::text("3")).await,
        Err(PortError::Full { .. })
    ));
}

#[tokio::test]
async fn test_send_to_closed_consumers_reports_closed() {
    let mut producer = PortSet::new("producer");
    let mut consumer = PortSet::new("consumer");
    let out = producer.add_output("out").unwrap();
    let input = consumer.add_input("in", PortMode::Pull).unwrap();
    out.connect(&input).unwrap();

    input.close();
    assert!(matches!(
        out.send(Message::text("late")).await,
        Err(PortError::Closed { .. })
    ));
}
