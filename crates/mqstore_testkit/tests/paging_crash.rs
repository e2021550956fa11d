//! Power loss while an address depages.
//!
//! Whatever write the crash hits, the restarted broker must deliver every
//! durable paged message exactly once and in the order it was paged.

use mqstore_paging::{AddressSettings, PagingConfig};
use mqstore_storage::{InMemoryFileFactory, SequentialFileFactory};
use mqstore_testkit::prelude::*;
use std::sync::Arc;

const ADDRESS: &str = "jms.queue.orders";

fn config() -> PagingConfig {
    PagingConfig::new().default_settings(AddressSettings::new().max_size_bytes(1000).page_size_bytes(1024))
}

fn boot(root: Arc<dyn SequentialFileFactory>) -> BrokerFixture {
    BrokerFixture::start(root.child("journal").unwrap(), root.child("paging").unwrap(), config())
}

/// Pages `count` durable messages into a fresh broker and returns their IDs.
fn page_messages(broker: &BrokerFixture, count: usize) -> Vec<u64> {
    broker.manager.report_size_change(ADDRESS, 5000).unwrap();
    (0..count)
        .map(|_| {
            let message = broker.message(150, true);
            assert!(broker.manager.page(ADDRESS, &message).unwrap());
            message.message_id
        })
        .collect()
}

fn depage_everything(broker: &BrokerFixture) {
    let store = broker.manager.get_page_store(ADDRESS).unwrap();
    while store.depage().unwrap() {}
    assert_eq!(store.stats().pages, 0);
}

#[test]
fn crash_during_depage_delivers_each_message_once() {
    for (round, writes) in [0u64, 1, 2, 3, 5, 8, 12, 20, 40].into_iter().enumerate() {
        let volume = InMemoryFileFactory::new();
        let crashing = CrashingFileFactory::new(Arc::new(volume.clone()));
        let paged = {
            let broker = boot(Arc::new(crashing.clone()));
            let paged = page_messages(&broker, 24);
            assert!(broker.manager.get_page_store(ADDRESS).unwrap().stats().pages >= 3);

            crashing.tear_on_crash(round % 2 == 1);
            crashing.crash_after_writes(writes);
            let _ = broker.manager.report_size_change(ADDRESS, -5000);
            paged
        };

        let broker = boot(Arc::new(volume));
        depage_everything(&broker);
        assert_eq!(broker.drain(), paged, "crash after {writes} writes");
        broker.stop();
    }
}

#[test]
fn delivered_messages_stay_delivered_after_ack() {
    let volume = InMemoryFileFactory::new();
    let paged = {
        let broker = boot(Arc::new(volume.clone()));
        let paged = page_messages(&broker, 12);
        broker.manager.report_size_change(ADDRESS, -5000).unwrap();
        let delivered = broker.drain();
        assert_eq!(delivered, paged);
        for &id in &delivered[..6] {
            broker.queue.acknowledge(id).unwrap();
        }
        broker.stop();
        paged
    };

    let broker = boot(Arc::new(volume));
    assert!(!broker.manager.is_paging(ADDRESS).unwrap());
    assert_eq!(broker.drain(), paged[6..].to_vec());
    broker.stop();
}

#[test]
fn restart_mid_paging_keeps_fifo_order() {
    let volume = InMemoryFileFactory::new();
    let mut paged = {
        let broker = boot(Arc::new(volume.clone()));
        let paged = page_messages(&broker, 10);
        broker.stop();
        paged
    };

    let broker = boot(Arc::new(volume));
    assert!(broker.manager.is_paging(ADDRESS).unwrap());
    for _ in 0..4 {
        let message = broker.message(150, true);
        assert!(broker.manager.page(ADDRESS, &message).unwrap());
        paged.push(message.message_id);
    }
    depage_everything(&broker);
    assert_eq!(broker.drain(), paged);
    broker.stop();
}
