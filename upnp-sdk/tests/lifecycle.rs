//! Init/finish lifecycle and handle registration

mod helpers;

use std::net::Ipv4Addr;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use helpers::{client, start, MockTransport, EVENT_URL};
use mockito::Server;
use upnp_sdk::{ActionRequest, Handle, Sdk, SdkConfig, SdkState, Timeout, UpnpError};

#[test]
fn test_entry_points_require_init() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = Sdk::with_transports(SdkConfig::loopback_only(), mock.transports()).unwrap();
    let handle = Handle::from_raw(1);

    assert_eq!(sdk.finish(), Err(UpnpError::NotInitialized));
    assert_eq!(sdk.register_client(|_| {}).err(), Some(UpnpError::NotInitialized));
    assert_eq!(sdk.search_async(handle, 3, "ssdp:all").err(), Some(UpnpError::NotInitialized));
    assert_eq!(
        sdk.subscribe(handle, EVENT_URL, Timeout::Seconds(60)).err(),
        Some(UpnpError::NotInitialized)
    );
    assert_eq!(
        sdk.send_action_async(
            handle,
            "http://127.0.0.1:9/control",
            "urn:schemas-upnp-org:service:tvcontrol:1",
            None,
            ActionRequest::raw("PowerOn", ""),
            |_| {},
        )
        .err(),
        Some(UpnpError::NotInitialized)
    );
    assert_eq!(sdk.add_virtual_dir("/web"), Err(UpnpError::NotInitialized));
    assert_eq!(sdk.server_port(), None);
    assert_eq!(sdk.server_ip_address(), None);
}

#[test]
fn test_init_finish_cycle() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);

    assert_eq!(sdk.state(), SdkState::Running);
    assert_eq!(sdk.server_ip_address(), Some(Ipv4Addr::LOCALHOST));
    let port = sdk.server_port().unwrap();
    assert!(port >= 49152);
    assert!(sdk.is_webserver_enabled());

    assert_eq!(sdk.init(Some(Ipv4Addr::LOCALHOST), 0), Err(UpnpError::AlreadyInitialized));

    sdk.finish().unwrap();
    assert_eq!(sdk.state(), SdkState::Uninitialized);
    assert_eq!(sdk.finish(), Err(UpnpError::NotInitialized));
    assert_eq!(sdk.server_port(), None);

    // Everything is released, so a second run starts cleanly
    sdk.init(Some(Ipv4Addr::LOCALHOST), 0).unwrap();
    assert!(sdk.server_port().is_some());
    sdk.finish().unwrap();
}

#[test]
fn test_unknown_interface_leaves_sdk_uninitialized() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = Sdk::with_transports(SdkConfig::loopback_only(), mock.transports()).unwrap();

    let result = sdk.init_interface(Some("no-such-if0"), 0);
    assert!(matches!(result, Err(UpnpError::InvalidParam(_))));
    assert_eq!(sdk.state(), SdkState::Uninitialized);
}

#[test]
fn test_single_client_and_handle_reuse() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);

    let (handle, _rx) = client(&sdk);
    assert_eq!(handle.get(), 1);
    assert_eq!(sdk.register_client(|_| {}).err(), Some(UpnpError::AlreadyRegistered));

    assert_eq!(sdk.unregister_client(Handle::from_raw(7)), Err(UpnpError::InvalidHandle));
    sdk.unregister_client(handle).unwrap();
    assert_eq!(sdk.unregister_client(handle), Err(UpnpError::InvalidHandle));

    let (again, _rx) = client(&sdk);
    assert_eq!(again.get(), 1);
    sdk.finish().unwrap();
}

#[test]
fn test_concurrent_registration_admits_one_client() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);
    let racers = 8;
    let barrier = Barrier::new(racers);

    let results: Vec<_> = thread::scope(|scope| {
        let attempts: Vec<_> = (0..racers)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    sdk.register_client(|_| {})
                })
            })
            .collect();
        attempts.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let winners: Vec<Handle> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners, vec![Handle::from_raw(1)]);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| r == &Err(UpnpError::AlreadyRegistered)));
    sdk.finish().unwrap();
}

#[test]
fn test_device_and_client_share_the_table() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);

    let device = sdk
        .register_root_device("http://127.0.0.1:8080/description.xml", |_| {})
        .unwrap();
    let (client_handle, _rx) = client(&sdk);
    assert_eq!(device.get(), 1);
    assert_eq!(client_handle.get(), 2);
    assert_eq!(sdk.handle_count(), 2);

    // A device handle is not a client handle
    assert_eq!(
        sdk.search_async(device, 1, "ssdp:all").err(),
        Some(UpnpError::InvalidHandle)
    );
    assert_eq!(
        sdk.register_root_device("http://127.0.0.1:8080/other.xml", |_| {}).err(),
        Some(UpnpError::AlreadyRegistered)
    );

    sdk.unregister_root_device(device).unwrap();
    assert_eq!(sdk.handle_count(), 1);
    sdk.finish().unwrap();
    assert_eq!(sdk.handle_count(), 0);
}

#[test]
fn test_finish_unsubscribes_client() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);
    let (handle, _rx) = client(&sdk);

    let (sid, _) = sdk.subscribe(handle, EVENT_URL, Timeout::Seconds(1800)).unwrap();
    sdk.finish().unwrap();

    assert_eq!(mock.unsubscribes.lock().as_slice(), &[sid]);
}

#[test]
fn test_virtual_dirs_and_limits() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);

    sdk.add_virtual_dir("web").unwrap();
    assert!(sdk.is_virtual_dir("/web/index.html"));
    assert!(sdk.add_virtual_dir("").is_err());
    sdk.remove_virtual_dir("/web").unwrap();
    assert!(matches!(sdk.remove_virtual_dir("/web"), Err(UpnpError::InvalidParam(_))));

    assert!(matches!(sdk.set_max_content_length(0), Err(UpnpError::InvalidParam(_))));
    sdk.set_max_content_length(4096).unwrap();

    sdk.enable_webserver(false).unwrap();
    assert!(!sdk.is_webserver_enabled());

    sdk.add_virtual_dir("/media").unwrap();
    sdk.finish().unwrap();
    sdk.init(Some(Ipv4Addr::LOCALHOST), 0).unwrap();
    assert!(!sdk.is_virtual_dir("/media/a.mp3"));
    assert!(sdk.is_webserver_enabled());
    sdk.finish().unwrap();
}

#[test]
fn test_periodic_job_stops_when_cancelled() {
    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);

    let (tx, rx) = crossbeam::channel::unbounded();
    let id = sdk
        .schedule_periodic(Duration::from_millis(20), move || {
            let _ = tx.send(());
        })
        .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    sdk.cancel_timer(id).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    while rx.try_recv().is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    assert!(sdk.schedule_periodic(Duration::ZERO, || {}).is_err());
    sdk.finish().unwrap();
}

#[test]
fn test_download_url_item() {
    let mut server = Server::new();
    let _page = server
        .mock("GET", "/web/readme.txt")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("hello")
        .create();
    let _missing = server.mock("GET", "/web/missing.txt").with_status(404).create();

    let mock = MockTransport::granting(Timeout::Seconds(1800));
    let sdk = start(SdkConfig::loopback_only(), &mock);

    let (body, content_type) = sdk
        .download_url_item(&format!("{}/web/readme.txt", server.url()))
        .unwrap();
    assert_eq!(body, "hello");
    assert_eq!(content_type, "text/plain");

    assert!(matches!(
        sdk.download_url_item(&format!("{}/web/missing.txt", server.url())),
        Err(UpnpError::InvalidUrl(_))
    ));
    assert!(matches!(sdk.download_url_item(""), Err(UpnpError::InvalidParam(_))));
    sdk.finish().unwrap();
}
