//! Console dispatch tests

use std::sync::Arc;

use chatty::console::{Flow, InputError};
use chatty::output::Stream;
use chatty::{
    BufferedOutput, Config, ConnectionError, ConnectionManager, Console, ShutdownCoordinator,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

async fn console() -> (Console, Arc<ConnectionManager>, Arc<BufferedOutput>) {
    let output = Arc::new(BufferedOutput::new());
    let manager = Arc::new(
        ConnectionManager::bind(
            Arc::new(Config::loopback()),
            output.clone(),
            ShutdownCoordinator::new(Duration::from_secs(1)),
        )
        .await
        .unwrap(),
    );
    let console = Console::new(manager.clone(), output.clone());
    (console, manager, output)
}

#[tokio::test]
async fn test_myip_and_myport() {
    let (console, manager, output) = console().await;

    assert_eq!(console.dispatch("myip").await.unwrap(), Flow::Continue);
    assert_eq!(console.dispatch("3").await.unwrap(), Flow::Continue);

    assert!(output.contains("Your IP address is: 127.0.0.1"));
    assert!(output.contains(&format!("Your port is: {}", manager.local_addr().port())));
}

#[tokio::test]
async fn test_help_output() {
    let (console, _manager, output) = console().await;

    console.dispatch("help").await.unwrap();
    let text = output.text(Stream::Out);
    assert!(text.contains("Application Commands"));
    assert!(text.contains("4. connect <destination> <port no>"));
    assert!(text.contains("8. exit"));

    output.clear();
    console.dispatch("help send").await.unwrap();
    let text = output.text(Stream::Out);
    assert!(text.contains("7. send"));
    assert!(!text.contains("4. connect"));
}

#[tokio::test]
async fn test_connect_send_terminate_through_console() {
    let (console, manager, output) = console().await;
    let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    console
        .dispatch(&format!("connect 127.0.0.1 {}", peer_port))
        .await
        .unwrap();
    let (mut remote, _) = peer.accept().await.unwrap();

    console.dispatch("7 1 hello world").await.unwrap();
    let mut buf = vec![0u8; "hello world".len()];
    timeout(Duration::from_secs(5), remote.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buf, b"hello world");

    console.dispatch("list").await.unwrap();
    assert!(output.contains(&format!(" 1 | 127.0.0.1     | {}", peer_port)));

    console.dispatch("terminate 1").await.unwrap();
    assert!(manager.registry().get(chatty::ConnectionId::new(1)).map_or(true, |c| c.is_closed()));
}

#[tokio::test]
async fn test_errors_are_typed() {
    let (console, manager, _output) = console().await;

    let err = console.dispatch("terminate abc").await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<InputError>(),
        Some(&InputError::InvalidId("abc".to_string()))
    );

    let err = console.dispatch("terminate 5").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConnectionError>(),
        Some(ConnectionError::InvalidConnectionId(_))
    ));

    let own_port = manager.local_addr().port();
    let err = console
        .dispatch(&format!("connect 127.0.0.1 {}", own_port))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConnectionError>(),
        Some(ConnectionError::SelfConnection { .. })
    ));

    let err = console.dispatch("frobnicate").await.unwrap_err();
    assert!(err.to_string().contains("invalid input error"));
}

#[tokio::test]
async fn test_stats_renders_metrics() {
    let (console, _manager, output) = console().await;
    console.dispatch("stats").await.unwrap();
    assert!(output.contains("chatty_active_connections 0"));
}

#[tokio::test]
async fn test_exit_ends_the_loop() {
    let (console, manager, output) = console().await;

    assert_eq!(console.dispatch("exit").await.unwrap(), Flow::Exit);
    assert!(!manager.is_listening());
    assert!(output.contains("Closing any established connections"));
}

#[tokio::test]
async fn test_run_reads_commands_until_exit() {
    let (console, manager, output) = console().await;
    let shutdown = ShutdownCoordinator::new(Duration::from_secs(1));
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send("myport".to_string()).unwrap();
    tx.send("bogus".to_string()).unwrap();
    tx.send("exit".to_string()).unwrap();

    timeout(Duration::from_secs(5), console.run(rx, &shutdown))
        .await
        .unwrap();

    assert!(output.contains(&format!("Your port is: {}", manager.local_addr().port())));
    assert!(output.text(Stream::Err).contains("ERROR"));
    assert!(!manager.is_listening());
    drop(tx);
}

#[tokio::test]
async fn test_end_of_input_runs_exit() {
    let (console, manager, output) = console().await;
    let shutdown = ShutdownCoordinator::new(Duration::from_secs(1));
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    drop(tx);

    timeout(Duration::from_secs(5), console.run(rx, &shutdown))
        .await
        .unwrap();

    assert!(!manager.is_listening());
    assert!(output.contains("Exiting program now .. bye!"));
}

#[tokio::test]
async fn test_shutdown_interrupts_running_command() {
    let (console, _manager, _output) = console().await;
    let shutdown = ShutdownCoordinator::new(Duration::from_secs(1));
    let (tx, rx) = mpsc::unbounded_channel();
    // TEST-NET-1 is never routed, so the dial stays pending or fails
    tx.send("connect 192.0.2.1 9".to_string()).unwrap();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();
    });

    // the dial timeout is 10s; shutdown must end the loop well before that
    timeout(Duration::from_secs(3), console.run(rx, &shutdown))
        .await
        .unwrap();
    assert!(shutdown.is_triggered());
    drop(tx);
}
