use super::*;
use crate::page::page_file_name;
use crate::queue::MemoryQueue;
use crate::settings::AddressSettings;
use crate::storage::JournalPagingStorage;
use mqstore_journal::{BatchingIdGenerator, Journal, JournalConfig};
use mqstore_storage::InMemoryFileFactory;
use std::thread;

const ADDRESS: &str = "queue/orders";

struct Harness {
    journal: Arc<Journal>,
    ids: Arc<BatchingIdGenerator>,
    manager: PagingManager,
    queue: Arc<MemoryQueue>,
    recovered: RecoveredPaging,
}

impl Harness {
    fn start(journal_volume: &InMemoryFileFactory, paging_volume: &InMemoryFileFactory, config: PagingConfig) -> Self {
        let journal = Journal::open(
            JournalConfig::new().file_size(64 * 1024).min_files(2).auto_reclaim(false),
            Arc::new(journal_volume.clone()),
        )
        .unwrap();
        let loaded = journal.load().unwrap();
        let ids = Arc::new(BatchingIdGenerator::recover(Arc::clone(&journal), 100, &loaded.records).unwrap());
        let storage: Arc<dyn PagingStorage> =
            Arc::new(JournalPagingStorage::new(Arc::clone(&journal), Arc::clone(&ids)));
        let recovered = RecoveredPaging::from_records(&loaded.records).unwrap();

        let queue = Arc::new(MemoryQueue::with_storage(Arc::clone(&storage)));
        for message in &recovered.messages {
            queue.enqueue(message.clone());
        }
        let manager = PagingManager::new(config, Arc::new(paging_volume.clone()), storage).unwrap();
        manager.set_depage_listener(Arc::clone(&queue) as Arc<dyn DepageListener>);
        manager.start(&recovered).unwrap();
        Self {
            journal,
            ids,
            manager,
            queue,
            recovered,
        }
    }

    fn message(&self, body_len: usize, durable: bool) -> PagedMessage {
        let id = self.ids.generate().unwrap();
        PagedMessage::new(id, durable, vec![id as u8; body_len])
    }

    fn drain(&self) -> Vec<u64> {
        let mut ids = Vec::new();
        while let Some(delivery) = self.queue.receive() {
            ids.push(delivery.message.message_id);
        }
        ids
    }

    fn stop(self) {
        self.manager.stop().unwrap();
        self.journal.stop().unwrap();
    }
}

fn config() -> PagingConfig {
    PagingConfig::new().default_settings(AddressSettings::new().max_size_bytes(1000).page_size_bytes(1024))
}

fn page_key(address: &str, page: u64) -> String {
    format!("{}/{}", address_dir(address), page_file_name(page))
}

#[test]
fn address_directories() {
    assert_eq!(address_dir("ab"), "6162");
    assert_eq!(parse_address_dir(&address_dir(ADDRESS)).as_deref(), Some(ADDRESS));
    assert_eq!(parse_address_dir("616"), None);
    assert_eq!(parse_address_dir("zz"), None);
    assert_eq!(parse_address_dir(""), None);
}

#[test]
fn requires_start() {
    let journal = Journal::open(JournalConfig::new(), Arc::new(InMemoryFileFactory::new())).unwrap();
    journal.load().unwrap();
    let ids = Arc::new(BatchingIdGenerator::new(Arc::clone(&journal), 10, 1));
    let manager = PagingManager::new(
        config(),
        Arc::new(InMemoryFileFactory::new()),
        Arc::new(JournalPagingStorage::new(journal, ids)),
    )
    .unwrap();
    assert!(matches!(
        manager.get_page_store(ADDRESS),
        Err(PagingError::InvalidState { .. })
    ));
}

#[test]
fn pages_are_depaged_in_order() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let h = Harness::start(&journal_volume, &paging_volume, config());

    assert!(!h.manager.page(ADDRESS, &h.message(10, true)).unwrap());
    h.manager.report_size_change(ADDRESS, 2000).unwrap();
    assert!(h.manager.is_paging(ADDRESS).unwrap());

    let mut paged = Vec::new();
    for _ in 0..25 {
        let message = h.message(80, true);
        assert!(h.manager.page(ADDRESS, &message).unwrap());
        paged.push(message.message_id);
    }
    let store = h.manager.get_page_store(ADDRESS).unwrap();
    assert!(store.stats().pages >= 2);
    assert_eq!(store.stats().paged_messages, 25);

    h.manager.report_size_change(ADDRESS, -2000).unwrap();
    assert!(!store.is_paging());
    assert_eq!(store.stats().pages, 0);
    assert!(list_pages(store_factory(&paging_volume).as_ref()).unwrap().is_empty());
    assert!(paged.iter().all(|&id| h.journal.contains_record(id)));

    assert_eq!(h.drain(), paged);
    h.queue.acknowledge(paged[0]).unwrap();
    assert!(!h.journal.contains_record(paged[0]));
    h.stop();
}

fn store_factory(paging_volume: &InMemoryFileFactory) -> Arc<dyn SequentialFileFactory> {
    paging_volume.child(&address_dir(ADDRESS)).unwrap()
}

#[test]
fn new_messages_keep_paging_while_pages_remain() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let h = Harness::start(&journal_volume, &paging_volume, config());

    h.manager.report_size_change(ADDRESS, 1500).unwrap();
    let first = h.message(10, false);
    assert!(h.manager.page(ADDRESS, &first).unwrap());

    // Below budget but with a page on disk: still paging.
    h.manager.get_page_store(ADDRESS).unwrap().add_size(-1000);
    assert!(h.manager.is_paging(ADDRESS).unwrap());
    let second = h.message(10, false);
    assert!(h.manager.page(ADDRESS, &second).unwrap());

    h.manager.report_size_change(ADDRESS, -1).unwrap();
    assert_eq!(h.drain(), vec![first.message_id, second.message_id]);
    assert!(!h.manager.is_paging(ADDRESS).unwrap());
    h.stop();
}

#[test]
fn restart_resumes_paging() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let mut paged = Vec::new();
    {
        let h = Harness::start(&journal_volume, &paging_volume, config());
        h.manager.report_size_change(ADDRESS, 5000).unwrap();
        for _ in 0..15 {
            let message = h.message(100, true);
            h.manager.page(ADDRESS, &message).unwrap();
            paged.push(message.message_id);
        }
        h.stop();
    }

    let h = Harness::start(&journal_volume, &paging_volume, config());
    assert!(h.recovered.messages.is_empty());
    let store = h.manager.get_page_store(ADDRESS).unwrap();
    assert!(store.is_paging());
    assert_eq!(h.manager.stores().len(), 1);

    while store.depage().unwrap() {}
    assert_eq!(h.drain(), paged);
    assert!(!store.is_paging());

    // A new message after restart gets an ID above everything issued before.
    assert!(h.message(1, false).message_id > *paged.iter().max().unwrap());
    h.stop();
}

#[test]
fn crash_after_depage_commit_does_not_redeliver() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let paged: Vec<u64>;
    {
        let h = Harness::start(&journal_volume, &paging_volume, config());
        h.manager.report_size_change(ADDRESS, 2000).unwrap();
        paged = (0..3)
            .map(|_| {
                let message = h.message(50, true);
                h.manager.page(ADDRESS, &message).unwrap();
                message.message_id
            })
            .collect();
        let page = paging_volume.file_data(&page_key(ADDRESS, 1)).unwrap();

        h.manager.report_size_change(ADDRESS, -2000).unwrap();
        assert!(paging_volume.file_data(&page_key(ADDRESS, 1)).is_none());
        assert_eq!(h.drain(), paged);
        h.queue.acknowledge(paged[0]).unwrap();

        // The page deletion never reached the disk.
        paging_volume.set_file_data(&page_key(ADDRESS, 1), page);
        h.stop();
    }

    let h = Harness::start(&journal_volume, &paging_volume, config());
    assert_eq!(
        h.recovered.last_pages.get(ADDRESS).map(|l| l.page_id),
        Some(1)
    );
    assert!(paging_volume.file_data(&page_key(ADDRESS, 1)).is_none());
    assert!(!h.manager.is_paging(ADDRESS).unwrap());
    assert_eq!(h.drain(), paged[1..].to_vec());
    h.stop();
}

#[test]
fn later_pages_survive_restart_after_partial_depage() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let (first, second) = {
        let h = Harness::start(&journal_volume, &paging_volume, config());
        h.manager.report_size_change(ADDRESS, 2000).unwrap();
        let store = h.manager.get_page_store(ADDRESS).unwrap();
        // Each message fills most of a page.
        let first = h.message(600, false);
        let second = h.message(600, false);
        h.manager.page(ADDRESS, &first).unwrap();
        h.manager.page(ADDRESS, &second).unwrap();
        assert_eq!(store.stats().pages, 2);

        store.add_size(-2000);
        assert!(store.depage().unwrap());
        assert!(store.is_paging());
        assert_eq!(h.drain(), vec![first.message_id]);
        h.stop();
        (first, second)
    };

    let h = Harness::start(&journal_volume, &paging_volume, config());
    let store = h.manager.get_page_store(ADDRESS).unwrap();
    assert!(store.is_paging());
    assert_eq!(store.stats().last_depaged_page, Some(1));
    assert!(store.depage().unwrap());
    let delivered = h.drain();
    assert_eq!(delivered, vec![second.message_id]);
    assert!(!delivered.contains(&first.message_id));
    h.stop();
}

#[test]
fn uncommitted_transactions_are_dropped() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let h = Harness::start(&journal_volume, &paging_volume, config());
    h.manager.report_size_change(ADDRESS, 2000).unwrap();

    let plain = h.message(10, false);
    let committed = h.message(10, true).with_transaction(7);
    let rolled_back = h.message(10, true).with_transaction(8);
    let last = h.message(10, false);
    for message in [&plain, &committed, &rolled_back, &last] {
        assert!(h.manager.page(ADDRESS, message).unwrap());
    }
    h.manager.commit_page_transaction(7).unwrap();
    h.manager.rollback_page_transaction(8);
    assert_eq!(h.manager.shared.transactions.committed(7).map(|i| i.remaining), Some(1));

    h.manager.report_size_change(ADDRESS, -2000).unwrap();
    assert_eq!(
        h.drain(),
        vec![plain.message_id, committed.message_id, last.message_id]
    );
    assert!(h.journal.contains_record(committed.message_id));
    assert!(!h.journal.contains_record(rolled_back.message_id));
    assert_eq!(h.manager.shared.transactions.committed_count(), 0);
    h.stop();
}

#[test]
fn open_transaction_holds_back_its_page() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let h = Harness::start(&journal_volume, &paging_volume, config());
    h.manager.report_size_change(ADDRESS, 2000).unwrap();

    let pending = h.message(10, false).with_transaction(5);
    h.manager.page(ADDRESS, &pending).unwrap();
    h.manager.report_size_change(ADDRESS, -2000).unwrap();
    assert!(h.drain().is_empty());
    assert!(h.manager.is_paging(ADDRESS).unwrap());

    let after = h.message(10, false);
    assert!(h.manager.page(ADDRESS, &after).unwrap());

    h.manager.commit_page_transaction(5).unwrap();
    let store = h.manager.get_page_store(ADDRESS).unwrap();
    while store.depage().unwrap() {}
    assert_eq!(h.drain(), vec![pending.message_id, after.message_id]);
    assert!(!store.is_paging());
    h.stop();
}

#[test]
fn committed_page_transaction_survives_restart() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let (committed, abandoned) = {
        let h = Harness::start(&journal_volume, &paging_volume, config());
        h.manager.report_size_change(ADDRESS, 2000).unwrap();
        let committed = h.message(10, false).with_transaction(3);
        let abandoned = h.message(10, false).with_transaction(4);
        h.manager.page(ADDRESS, &committed).unwrap();
        h.manager.page(ADDRESS, &abandoned).unwrap();
        h.manager.commit_page_transaction(3).unwrap();
        h.stop();
        (committed, abandoned)
    };

    let h = Harness::start(&journal_volume, &paging_volume, config());
    assert_eq!(h.recovered.page_transactions.len(), 1);
    let store = h.manager.get_page_store(ADDRESS).unwrap();
    while store.depage().unwrap() {}
    let delivered = h.drain();
    assert_eq!(delivered, vec![committed.message_id]);
    assert!(!delivered.contains(&abandoned.message_id));
    h.stop();

    let h = Harness::start(&journal_volume, &paging_volume, config());
    assert!(h.recovered.page_transactions.is_empty());
    h.stop();
}

#[test]
fn full_address_drops_messages() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let config = config().address(
        "metrics",
        AddressSettings::new().max_size_bytes(100).drop_when_full(true),
    );
    let h = Harness::start(&journal_volume, &paging_volume, config);

    h.manager.report_size_change("metrics", 200).unwrap();
    assert!(h.manager.page("metrics", &h.message(10, false)).unwrap());
    let store = h.manager.get_page_store("metrics").unwrap();
    assert_eq!(store.stats().dropped_messages, 1);
    assert_eq!(store.stats().pages, 0);

    h.manager.report_size_change("metrics", -200).unwrap();
    assert!(!store.is_paging());
    assert!(h.drain().is_empty());
    h.stop();
}

#[test]
fn global_budget_pages_every_address() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let config = PagingConfig::new()
        .global_max_size(1000)
        .default_settings(AddressSettings::new().page_size_bytes(1024));
    let h = Harness::start(&journal_volume, &paging_volume, config);

    h.manager.report_size_change("a", 600).unwrap();
    assert!(!h.manager.is_global_paging());
    h.manager.report_size_change("b", 600).unwrap();
    assert!(h.manager.is_global_paging());
    assert_eq!(h.manager.global_size(), 1200);
    assert!(h.manager.is_paging("b").unwrap());

    let late = h.message(10, false);
    assert!(h.manager.page("b", &late).unwrap());

    h.manager.report_size_change("a", -600).unwrap();
    assert!(!h.manager.is_global_paging());
    assert_eq!(h.drain(), vec![late.message_id]);
    assert!(!h.manager.is_paging("b").unwrap());
    h.stop();
}

#[test]
fn concurrent_callers_share_one_store() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let h = Harness::start(&journal_volume, &paging_volume, config());

    let stores: Vec<Arc<PagingStore>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| h.manager.get_page_store(ADDRESS).unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    assert!(stores.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(h.manager.stores().len(), 1);
    h.stop();
}

#[test]
fn lists_paged_addresses() {
    let journal_volume = InMemoryFileFactory::new();
    let paging_volume = InMemoryFileFactory::new();
    let h = Harness::start(&journal_volume, &paging_volume, config());
    h.manager.report_size_change(ADDRESS, 2000).unwrap();
    h.manager.page(ADDRESS, &h.message(10, false)).unwrap();
    paging_volume.set_file_data("not-hex/x.page", Vec::new());

    let listed = list_paged_addresses(&paging_volume).unwrap();
    assert_eq!(listed, vec![(ADDRESS.to_string(), vec![1])]);
    h.stop();
}
