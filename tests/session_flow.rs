mod common;

use common::{context, register, Client};
use relaybbs::bbs::session::LOGIN_FAILED;

#[tokio::test]
async fn register_login_post_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;

    // First visit: register, then log out
    let mut client = Client::connect(ctx.clone());
    let banner = client.expect("Choose (L)ogin or (R)egister: ").await;
    assert!(banner.contains("Welcome to Test BBS!"), "{banner}");
    assert!(banner.contains("\r\n\r\n\r\n\r\n\r\n"), "five blank lines after banner");
    client.send("R").await;
    client.expect("Choose a username: ").await;
    client.send("alice").await;
    client.expect("Choose a password: ").await;
    client.send("password1").await;
    client.expect("Registration successful! Welcome, alice!").await;
    let menu = client.expect("Choice: ").await;
    assert!(menu.contains("1. Read messages"));
    assert!(menu.contains("4. Logout"));
    assert!(!menu.contains("IRC Bridge"), "relay hidden without a bridge");
    client.send("4").await;
    let (tail, result) = client.finish().await;
    assert!(tail.contains("Goodbye!"), "{tail}");
    assert!(result.is_ok());

    // Second visit: log in, post, read
    let mut client = Client::connect(ctx.clone());
    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("l").await;
    client.expect("Username: ").await;
    client.send("alice").await;
    client.expect("Password: ").await;
    client.send("password1").await;
    client.expect("Login successful! Welcome, alice!").await;
    client.expect("Choice: ").await;
    client.send("2").await;
    client.expect("Enter your message: ").await;
    client.send("hello board").await;
    client.expect("Message posted successfully!").await;
    client.expect("Choice: ").await;
    client.send("1").await;
    let listing = client.expect("Choice: ").await;
    let line = listing
        .lines()
        .find(|l| l.contains("alice:"))
        .expect("posted message listed");
    assert!(line.trim_end().ends_with("alice: hello board"), "{line}");
    client.send("4").await;
    let (tail, result) = client.finish().await;
    assert!(tail.contains("Goodbye!"));
    assert!(result.is_ok());

    assert_eq!(ctx.board.message_count().await.unwrap(), 1);
}

async fn failed_login_text(client: &mut Client, username: &str, password: &str) -> String {
    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("l").await;
    client.expect("Username: ").await;
    client.send(username).await;
    client.expect("Password: ").await;
    client.send(password).await;
    let text = client.expect("Choose (L)ogin or (R)egister: ").await;
    text.lines()
        .find(|l| l.contains("Login failed"))
        .expect("failure line")
        .to_string()
}

#[tokio::test]
async fn unknown_user_and_wrong_password_fail_identically() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;
    ctx.users.create_user("carol", "password1").await.unwrap();

    let mut client = Client::connect(ctx.clone());
    let unknown = failed_login_text(&mut client, "bob", "password1").await;
    client.send("").await;
    client.expect("Invalid choice").await;
    let wrong = failed_login_text(&mut client, "carol", "not-her-password").await;

    assert_eq!(unknown, wrong);
    assert!(unknown.contains(LOGIN_FAILED));
    client.hang_up().await.unwrap();
}

#[tokio::test]
async fn invalid_choices_reprompt() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;

    let mut client = Client::connect(ctx.clone());
    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("x").await;
    client.expect("Invalid choice. Please enter 'L' or 'R'.").await;
    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("  r  ").await;
    client.expect("Choose a username: ").await;
}

#[tokio::test]
async fn registration_failures_report_the_reason() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;
    ctx.users.create_user("alice", "password1").await.unwrap();

    let mut client = Client::connect(ctx.clone());
    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("r").await;
    client.expect("Choose a username: ").await;
    client.send("ab").await;
    client.expect("Choose a password: ").await;
    client.send("password1").await;
    client
        .expect("Registration failed: Invalid username: Username is too short")
        .await;

    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("r").await;
    client.expect("Choose a username: ").await;
    client.send("alice").await;
    client.expect("Choose a password: ").await;
    client.send("password2").await;
    client.expect("Registration failed: Username 'alice' is already taken").await;

    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("r").await;
    client.expect("Choose a username: ").await;
    client.send("dave").await;
    client.expect("Choose a password: ").await;
    client.send("short").await;
    client.expect("Registration failed: Invalid password").await;
    client.expect("Choose (L)ogin or (R)egister: ").await;
}

#[tokio::test]
async fn menu_rejects_unknown_and_unavailable_choices() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;

    let mut client = Client::connect(ctx.clone());
    register(&mut client, "erin", "password1").await;
    client.send("9").await;
    client.expect("Invalid choice. Please try again.").await;
    client.expect("Choice: ").await;
    // No bridge configured
    client.send("3").await;
    client.expect("Invalid choice. Please try again.").await;
    client.expect("Choice: ").await;
    client.send("1").await;
    client.expect("No messages yet.").await;
    client.expect("Choice: ").await;
}

#[tokio::test]
async fn invalid_posts_leave_the_board_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;

    let mut client = Client::connect(ctx.clone());
    register(&mut client, "frank", "password1").await;
    client.send("2").await;
    client.expect("Enter your message: ").await;
    client.send("   ").await;
    client.expect("Error posting message: Message cannot be empty").await;
    client.expect("Choice: ").await;
    client.send("2").await;
    client.expect("Enter your message: ").await;
    client.send(&"x".repeat(501)).await;
    client.expect("Error posting message: Message too long").await;
    client.expect("Choice: ").await;

    assert_eq!(ctx.board.message_count().await.unwrap(), 0);
}

#[tokio::test]
async fn end_of_stream_terminates_with_farewell() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;

    let mut client = Client::connect(ctx.clone());
    client.expect("Choose (L)ogin or (R)egister: ").await;
    client.send("l").await;
    client.expect("Username: ").await;
    // Disconnect mid-login
    client.hang_up().await.unwrap();
}

#[tokio::test]
async fn sessions_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), None).await;

    let mut a = Client::connect(ctx.clone());
    let mut b = Client::connect(ctx.clone());
    register(&mut a, "gina", "password1").await;
    register(&mut b, "hank", "password1").await;

    // One session ending does not affect the other
    a.hang_up().await.unwrap();
    b.send("2").await;
    b.expect("Enter your message: ").await;
    b.send("still here").await;
    b.expect("Message posted successfully!").await;
    let lines = ctx.board.get_messages().await.unwrap();
    assert!(lines[0].ends_with("hank: still here"));
}
