use std::sync::Arc;

use relaybbs::storage::{MessageBoard, PostError};
use relaybbs::validation::MessageError;

async fn board() -> (tempfile::TempDir, MessageBoard) {
    let dir = tempfile::tempdir().unwrap();
    let board = MessageBoard::open(dir.path().join("guestbook.txt"))
        .await
        .unwrap();
    (dir, board)
}

#[tokio::test]
async fn bodies_within_bounds_are_stored_verbatim() {
    let (_dir, board) = board().await;
    for len in [1usize, 2, 250, 499, 500] {
        let body = "b".repeat(len);
        board.post_message("alice", &body).await.unwrap();
        let last = board.get_messages().await.unwrap().pop().unwrap();
        assert!(last.ends_with(&format!("] alice: {body}")), "length {len}");
    }
    assert_eq!(board.message_count().await.unwrap(), 5);
}

#[tokio::test]
async fn out_of_bounds_bodies_leave_the_board_unchanged() {
    let (_dir, board) = board().await;
    board.post_message("alice", "keep me").await.unwrap();

    assert!(matches!(
        board.post_message("alice", "").await,
        Err(PostError::Invalid(MessageError::Empty))
    ));
    assert!(matches!(
        board.post_message("alice", &"x".repeat(501)).await,
        Err(PostError::Invalid(MessageError::TooLong))
    ));

    let content = std::fs::read_to_string(board.path()).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.ends_with("alice: keep me\n"));
}

#[tokio::test]
async fn length_is_counted_in_characters() {
    let (_dir, board) = board().await;
    board.post_message("alice", &"é".repeat(500)).await.unwrap();
    assert!(board.post_message("alice", &"é".repeat(501)).await.is_err());
    assert_eq!(board.message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn embedded_newlines_stay_on_one_line() {
    let (_dir, board) = board().await;
    board.post_message("alice", "first\nsecond").await.unwrap();
    let lines = board.get_messages().await.unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("alice: first second"));
}

#[tokio::test]
async fn reads_are_repeatable() {
    let (_dir, board) = board().await;
    board.post_message("alice", "one").await.unwrap();
    board.post_message("bob", "two").await.unwrap();
    let first = board.get_messages().await.unwrap();
    let second = board.get_messages().await.unwrap();
    assert_eq!(first, second);
    assert!(first[0].ends_with("alice: one"));
    assert!(first[1].ends_with("bob: two"));
}

#[tokio::test]
async fn concurrent_posts_keep_lines_intact() {
    let (_dir, board) = board().await;
    let board = Arc::new(board);
    let mut tasks = Vec::new();
    for writer in 0..8 {
        let board = Arc::clone(&board);
        tasks.push(tokio::spawn(async move {
            for n in 0..25 {
                let body = format!("writer{writer} message{n} {}", "z".repeat(200));
                board.post_message(&format!("user{writer}"), &body).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let lines = board.get_messages().await.unwrap();
    assert_eq!(lines.len(), 200);
    for line in &lines {
        assert!(line.starts_with('['), "{line}");
        assert!(line.ends_with(&"z".repeat(200)), "{line}");
    }
}
