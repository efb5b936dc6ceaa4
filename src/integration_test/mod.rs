#[cfg(test)]
mod network_tests {
    use std::{
        net::SocketAddr,
        sync::Arc,
        thread::sleep,
        time::{Duration, Instant},
    };

    use crossbeam_channel::Receiver;

    use crate::{
        packet::Packet,
        servers::{
            test_utils::{
                addr, entries, init_logger, recorded, recorder, Calls, Journal, Lifecycle,
                RecordingFactory,
            },
            tiered::TieredServer,
            BrickServer, FnHandler, ServerConfig, ServerThread,
        },
        transport::{
            memory::{MemoryNetwork, MemoryTransport, SERVER_FULL_REASON},
            ConnectionId, ConnectionStatus, DeliveryMethod, Transport, TransportConfig,
            TransportEvent,
        },
    };

    const APP: &str = "net";

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline: Instant = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            sleep(Duration::from_millis(5));
        }
        done()
    }

    fn bind(network: &MemoryNetwork, port: u16) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport::bind(network, &TransportConfig::new(APP, port)).unwrap())
    }

    fn new_server(
        network: &MemoryNetwork,
        config: ServerConfig,
        factory: RecordingFactory,
    ) -> (BrickServer<RecordingFactory>, Arc<MemoryTransport>) {
        let transport: Arc<MemoryTransport> = bind(network, config.transport.port);
        let server = BrickServer::new(config, transport.clone(), factory);
        (server, transport)
    }

    /// next status change seen by a raw endpoint, notices are skipped
    fn next_status(events: &Receiver<TransportEvent>) -> (ConnectionStatus, ConnectionId, String) {
        loop {
            match events.recv_timeout(Duration::from_secs(2)).unwrap() {
                TransportEvent::StatusChanged {
                    status,
                    connection,
                    reason,
                    ..
                } => return (status, connection, reason),
                TransportEvent::Data { .. } => panic!("unexpected data"),
                _ => {}
            }
        }
    }

    fn next_data(events: &Receiver<TransportEvent>) -> (SocketAddr, Packet) {
        loop {
            match events.recv_timeout(Duration::from_secs(2)).unwrap() {
                TransportEvent::Data { sender, data } => {
                    return (sender, Packet::from_wire(&data).unwrap())
                }
                TransportEvent::StatusChanged { status, .. } => {
                    panic!("unexpected status {status}")
                }
                _ => {}
            }
        }
    }

    /// raw client endpoint connected to `server`
    fn connect_client(
        network: &MemoryNetwork,
        server: SocketAddr,
    ) -> (Arc<MemoryTransport>, Receiver<TransportEvent>, ConnectionId) {
        let client: Arc<MemoryTransport> = bind(network, 0);
        client.start().unwrap();
        let events: Receiver<TransportEvent> = client.events();
        client.connect(server).unwrap();
        assert_eq!(next_status(&events).0, ConnectionStatus::Connecting);
        let (status, id, _) = next_status(&events);
        assert_eq!(status, ConnectionStatus::Connected);
        (client, events, id)
    }

    fn send(client: &MemoryTransport, id: ConnectionId, packet: &Packet) {
        client
            .send(&packet.to_wire().unwrap(), &[id], DeliveryMethod::ReliableOrdered, 0)
            .unwrap();
    }

    #[test]
    fn test_chat_connect_disconnect() {
        init_logger();
        let network: MemoryNetwork = MemoryNetwork::new();
        let factory: RecordingFactory = RecordingFactory::default();
        let journal: Journal = Arc::clone(&factory.journal);
        let (server, _) = new_server(&network, ServerConfig::new(APP, 5000), factory);

        let calls: Calls = Calls::default();
        server.handle().add_handler(recorder("chat", 1, 1, &calls));
        let roster: Calls = Calls::default();
        let roster_c: Calls = Arc::clone(&roster);
        server.handle().add_handler(FnHandler::new("roster", 1, 2, move |p, _, peers| {
            for other in peers.iter() {
                roster_c
                    .lock()
                    .unwrap()
                    .push(("roster".to_string(), p.clone(), other.address()));
            }
            Ok(())
        }));
        let thread: ServerThread = server.spawn().unwrap();

        let (a, a_events, a_id) = connect_client(&network, addr(5000));
        assert!(wait_until(|| entries(&journal).len() == 1));
        assert_eq!(entries(&journal), vec![Lifecycle::Connect(a.local_address())]);

        let hi: Packet = Packet::new(1, 1, b"hi".to_vec());
        send(&a, a_id, &hi);
        assert!(wait_until(|| !recorded(&calls).is_empty()));
        assert_eq!(
            recorded(&calls),
            vec![("chat".to_string(), hi, a.local_address())]
        );

        a.disconnect(a_id, "closed").unwrap();
        assert_eq!(next_status(&a_events).0, ConnectionStatus::Disconnected);
        assert!(wait_until(|| entries(&journal).len() == 2));
        assert_eq!(
            entries(&journal)[1],
            Lifecycle::Disconnect(a.local_address(), "closed".to_string())
        );

        // a is gone from the table: a newcomer sees only itself
        let (b, _b_events, b_id) = connect_client(&network, addr(5000));
        send(&b, b_id, &Packet::new(1, 2, Vec::new()));
        assert!(wait_until(|| !recorded(&roster).is_empty()));
        let seen: Vec<SocketAddr> = recorded(&roster).into_iter().map(|c| c.2).collect();
        assert_eq!(seen, vec![b.local_address()]);

        thread.shutdown().unwrap();
        assert!(!network.is_bound(addr(5000)));
    }

    #[test]
    fn test_malformed_keeps_serving() {
        init_logger();
        let network: MemoryNetwork = MemoryNetwork::new();
        let (server, _) = new_server(
            &network,
            ServerConfig::new(APP, 5001),
            RecordingFactory::default(),
        );
        let calls: Calls = Calls::default();
        server.handle().add_handler(recorder("chat", 1, 1, &calls));
        let thread: ServerThread = server.spawn().unwrap();

        let (a, _a_events, a_id) = connect_client(&network, addr(5001));
        a.send(&[0, 1], &[a_id], DeliveryMethod::Unreliable, 0).unwrap();
        send(&a, a_id, &Packet::new(1, 1, b"after".to_vec()));
        assert!(wait_until(|| !recorded(&calls).is_empty()));
        assert_eq!(recorded(&calls).len(), 1);
        assert_eq!(recorded(&calls)[0].1.payload(), b"after");
        assert!(thread.handle().is_running());
        thread.shutdown().unwrap();
    }

    #[test]
    fn test_federation_broadcast() {
        init_logger();
        let network: MemoryNetwork = MemoryNetwork::new();

        // master: the login server address is a federated server
        let master_factory: RecordingFactory = RecordingFactory {
            server_addresses: [addr(7000)].into_iter().collect(),
            ..RecordingFactory::default()
        };
        let master_journal: Journal = Arc::clone(&master_factory.journal);
        let (master, _) = new_server(&network, ServerConfig::new(APP, 6000), master_factory);
        let master_calls: Calls = Calls::default();
        master
            .handle()
            .add_handler(recorder("hello client", 5, 5, &master_calls));
        master
            .handle()
            .add_server_handler(recorder("hello server", 5, 5, &master_calls));
        let master: ServerThread = master.spawn().unwrap();

        // login: sees the master as a server
        let login_factory: RecordingFactory = RecordingFactory {
            server_addresses: [addr(6000)].into_iter().collect(),
            ..RecordingFactory::default()
        };
        let login_journal: Journal = Arc::clone(&login_factory.journal);
        let login_calls: Calls = Calls::default();
        let login: TieredServer<RecordingFactory> = TieredServer::new(
            ServerConfig::new(APP, 7000),
            addr(6000).into(),
            bind(&network, 7000),
            login_factory,
        );
        login
            .handle()
            .add_server_handler(recorder("news", 9, 9, &login_calls));
        let login: ServerThread = login.spawn().unwrap();

        assert!(wait_until(|| entries(&login_journal)
            == vec![Lifecycle::Connect(addr(6000))]));
        let (client, client_events, client_id) = connect_client(&network, addr(6000));
        assert!(wait_until(|| entries(&master_journal).len() == 2));
        assert_eq!(entries(&master_journal)[0], Lifecycle::Connect(addr(7000)));

        // classification on the master follows its own factory
        login
            .handle()
            .send_to_all(&Packet::new(5, 5, Vec::new()), DeliveryMethod::ReliableOrdered)
            .unwrap();
        send(&client, client_id, &Packet::new(5, 5, Vec::new()));
        assert!(wait_until(|| recorded(&master_calls).len() == 2));
        let mut by_name: Vec<(String, SocketAddr)> = recorded(&master_calls)
            .into_iter()
            .map(|c| (c.0, c.2))
            .collect();
        by_name.sort();
        assert_eq!(
            by_name,
            vec![
                ("hello client".to_string(), client.local_address()),
                ("hello server".to_string(), addr(7000)),
            ]
        );

        let news: Packet = Packet::new(9, 9, b"news".to_vec());
        master
            .handle()
            .send_to_all(&news, DeliveryMethod::ReliableOrdered)
            .unwrap();
        assert_eq!(next_data(&client_events), (addr(6000), news.clone()));
        assert!(wait_until(|| !recorded(&login_calls).is_empty()));
        assert_eq!(
            recorded(&login_calls),
            vec![("news".to_string(), news, addr(6000))]
        );

        master.shutdown().unwrap();
        assert!(wait_until(|| entries(&login_journal).len() == 2));
        assert_eq!(
            entries(&login_journal)[1],
            Lifecycle::Disconnect(addr(6000), crate::servers::SHUTDOWN_REASON.to_string())
        );
        assert!(login.handle().is_running());
        login.shutdown().unwrap();
    }

    #[test]
    fn test_server_full() {
        init_logger();
        let network: MemoryNetwork = MemoryNetwork::new();
        let factory: RecordingFactory = RecordingFactory::default();
        let journal: Journal = Arc::clone(&factory.journal);
        let (server, transport) = new_server(
            &network,
            ServerConfig::new(APP, 5002).with_max_connections(1),
            factory,
        );
        let thread: ServerThread = server.spawn().unwrap();

        let (_a, _a_events, _) = connect_client(&network, addr(5002));
        let b: Arc<MemoryTransport> = bind(&network, 0);
        b.start().unwrap();
        let b_events: Receiver<TransportEvent> = b.events();
        b.connect(addr(5002)).unwrap();
        assert_eq!(next_status(&b_events).0, ConnectionStatus::Connecting);
        let (status, _, reason) = next_status(&b_events);
        assert_eq!(status, ConnectionStatus::Disconnected);
        assert_eq!(reason, SERVER_FULL_REASON);

        assert!(wait_until(|| entries(&journal).len() == 1));
        assert_eq!(transport.connection_count(), 1);
        assert!(thread.handle().is_running());
        thread.shutdown().unwrap();
    }

    #[test]
    fn test_kick() {
        init_logger();
        let network: MemoryNetwork = MemoryNetwork::new();
        let factory: RecordingFactory = RecordingFactory::default();
        let journal: Journal = Arc::clone(&factory.journal);
        let (server, _) = new_server(&network, ServerConfig::new(APP, 5003), factory);
        let thread: ServerThread = server.spawn().unwrap();

        let (a, a_events, _) = connect_client(&network, addr(5003));
        assert!(wait_until(|| entries(&journal).len() == 1));
        thread.handle().disconnect(a.local_address(), "kicked").unwrap();
        let (status, _, reason) = next_status(&a_events);
        assert_eq!(status, ConnectionStatus::Disconnected);
        assert_eq!(reason, "kicked");
        assert!(wait_until(|| entries(&journal).len() == 2));
        assert_eq!(
            entries(&journal)[1],
            Lifecycle::Disconnect(a.local_address(), "kicked".to_string())
        );

        let handle = thread.handle().clone();
        thread.shutdown().unwrap();
        assert!(handle.disconnect(a.local_address(), "late").is_err());
    }
}
