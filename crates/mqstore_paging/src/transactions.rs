//! Producer transactions that paged messages.

use crate::storage::PageTransactionInfo;
use dashmap::DashMap;

/// Open and committed page transactions, shared by every store.
///
/// A message paged inside a transaction is depaged only if that transaction
/// committed. While the transaction is still open, depage stops at the page
/// holding its messages.
#[derive(Debug, Default)]
pub(crate) struct PageTransactions {
    /// Messages paged per open transaction.
    open: DashMap<u64, u32>,
    committed: DashMap<u64, PageTransactionInfo>,
}

impl PageTransactions {
    pub fn paged(&self, tx_id: u64) {
        *self.open.entry(tx_id).or_insert(0) += 1;
    }

    pub fn is_open(&self, tx_id: u64) -> bool {
        self.open.contains_key(&tx_id)
    }

    /// Ends an open transaction, returning how many messages it paged.
    pub fn finish(&self, tx_id: u64) -> Option<u32> {
        self.open.remove(&tx_id).map(|(_, count)| count)
    }

    pub fn committed(&self, tx_id: u64) -> Option<PageTransactionInfo> {
        self.committed.get(&tx_id).map(|info| *info)
    }

    /// Records the latest state of a committed transaction. A transaction
    /// with nothing left on pages is forgotten.
    pub fn update(&self, info: PageTransactionInfo) {
        if info.remaining == 0 {
            self.committed.remove(&info.tx_id);
        } else {
            self.committed.insert(info.tx_id, info);
        }
    }

    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_committed() {
        let txs = PageTransactions::default();
        txs.paged(4);
        txs.paged(4);
        assert!(txs.is_open(4));
        assert_eq!(txs.finish(4), Some(2));
        assert!(!txs.is_open(4));
        assert_eq!(txs.finish(4), None);

        let info = PageTransactionInfo {
            tx_id: 4,
            record_id: 100,
            remaining: 2,
        };
        txs.update(info);
        assert_eq!(txs.committed(4), Some(info));
        txs.update(PageTransactionInfo { remaining: 0, ..info });
        assert_eq!(txs.committed(4), None);
        assert_eq!(txs.committed_count(), 0);
    }
}
