//! Postback payloads from quick-reply buttons.

mod helpers;

use helpers::TestHarness;

#[tokio::test]
async fn valid_postback_is_routed() {
    let h = TestHarness::new();

    let replies = h.send_postback("U-pb", "course:uid$1132U0002").await;
    assert!(replies[0].summary().contains("機器學習導論"));

    let courses = h.send_postback("U-pb", "program:courses$人工智慧學程").await;
    let text = courses[0].summary();
    assert!(text.contains("1132U0002"));
    assert!(!text.contains("1121U0009"));

    assert_eq!(h.telemetry().postbacks, 2);
}

#[tokio::test]
async fn malformed_postbacks_are_dropped_silently() {
    let h = TestHarness::new();

    for data in ["program:courses_no_split", "nosuch:thing", "garbage"] {
        let replies = h.send_postback("U-bad", data).await;
        assert!(replies.is_empty(), "{data} produced {replies:?}");
    }
    assert!(h.sink.sent().is_empty());

    let t = h.telemetry();
    assert_eq!(t.postbacks, 3);
    assert_eq!(t.malformed_postbacks, 3);
}

#[tokio::test]
async fn chat_recovers_after_malformed_postback() {
    let h = TestHarness::new();
    assert!(h.send_postback("U-recover", "id:teleport").await.is_empty());

    let replies = h.send_text("U-recover", "緊急電話").await;
    assert!(replies[0].summary().contains("校安中心"));
}
