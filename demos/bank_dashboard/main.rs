//! Bank Dashboard Example
//!
//! This example demonstrates the quench data layer end to end:
//! - Identity-gated queries (nothing fetches until a user signs in)
//! - A cached account summary shared by every consumer
//! - Cursor-based pagination over a transaction history
//! - A fixed-interval credit-check poll with a one-shot completion callback
//! - A derived banner query gated on the account reaching a terminal status
//!
//! Run with: cargo run -p bank_dashboard

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quench_core::{CacheKey, CacheStore, FetchError, SharedIdentity, StoreConfig, Subject};
use quench_query::{
    classify_check_status, CheckStatus, Cursor, Gate, Page, PageState, PaginatedQuery,
    PollingQuery, QueryUnit,
};
use tracing::info;

/// An account summary as the remote API reports it.
#[derive(Debug, Clone)]
struct Account {
    display_name: String,
    balance_cents: i64,
    status: AccountStatus,
}

/// Lifecycle of a newly opened account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountStatus {
    InProgress,
    Done,
}

/// A single ledger entry in the transaction history.
#[derive(Debug, Clone)]
struct Transaction {
    id: String,
    description: String,
    amount_cents: i64,
}

/// History filter; baked into the cache key, so switching filters starts
/// pagination from scratch under a separate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionFilter {
    All,
    Deposit,
    Withdraw,
}

impl TransactionFilter {
    fn as_str(self) -> &'static str {
        match self {
            TransactionFilter::All => "all",
            TransactionFilter::Deposit => "deposit",
            TransactionFilter::Withdraw => "withdraw",
        }
    }

    fn matches(self, t: &Transaction) -> bool {
        match self {
            TransactionFilter::All => true,
            TransactionFilter::Deposit => t.amount_cents > 0,
            TransactionFilter::Withdraw => t.amount_cents < 0,
        }
    }
}

/// A promotional banner shown once the account is fully opened.
#[derive(Debug, Clone)]
struct Banner {
    headline: String,
}

/// Simulated account backend. The account finishes opening after the first
/// status read, so a refetch is needed to observe `Done`.
struct AccountApi {
    reads: AtomicU32,
}

impl AccountApi {
    fn new() -> Self {
        Self {
            reads: AtomicU32::new(0),
        }
    }

    async fn account(&self) -> Result<Account, FetchError> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let status = if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            AccountStatus::InProgress
        } else {
            AccountStatus::Done
        };
        Ok(Account {
            display_name: "Avery Quinn".to_string(),
            balance_cents: 1_234_56,
            status,
        })
    }
}

/// Simulated credit-check backend: reports `InProgress` twice, then
/// `Complete`.
struct CreditCheck {
    polls: AtomicU32,
}

impl CreditCheck {
    fn new() -> Self {
        Self {
            polls: AtomicU32::new(0),
        }
    }

    async fn status(&self) -> Result<CheckStatus, FetchError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(if n < 2 {
            CheckStatus::InProgress
        } else {
            CheckStatus::Complete
        })
    }
}

/// Simulated remote API. Each call sleeps briefly to mimic network latency.
mod remote {
    use super::*;

    const PAGE_SIZE: usize = 2;

    /// Serves the ledger in fixed-size pages. The cursor is the offset of
    /// the next page; the final page carries a null cursor.
    pub async fn transactions(
        filter: TransactionFilter,
        cursor: Option<Cursor>,
    ) -> Result<Page<Transaction>, FetchError> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let start = match cursor {
            None => 0,
            Some(c) => c
                .as_str()
                .parse::<usize>()
                .map_err(|_| FetchError::fatal(format!("unknown cursor {c}")))?,
        };

        let matching: Vec<Transaction> =
            ledger().into_iter().filter(|t| filter.matches(t)).collect();
        let items: Vec<Transaction> =
            matching.iter().skip(start).take(PAGE_SIZE).cloned().collect();
        let next = if start + PAGE_SIZE < matching.len() {
            Some(Cursor::new((start + PAGE_SIZE).to_string()))
        } else {
            None
        };
        Ok(Page::new(items, next))
    }

    fn ledger() -> Vec<Transaction> {
        vec![
            tx("t1", "Coffee", -450),
            tx("t2", "Paycheck", 250_000),
            tx("t3", "Rent", -180_000),
            tx("t4", "Refund", 2_000),
        ]
    }

    pub async fn banners(user_id: &str) -> Result<Vec<Banner>, FetchError> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok(vec![Banner {
            headline: format!("Welcome aboard, {user_id}! Your card ships this week."),
        }])
    }

    fn tx(id: &str, description: &str, amount_cents: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            description: description.to_string(),
            amount_cents,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = Arc::new(CacheStore::with_config(
        StoreConfig::default().with_default_stale_after(Duration::from_secs(60)),
    ));
    let identity = SharedIdentity::signed_out();

    // Home cards are public content and need no identity.
    let home_cards = QueryUnit::new(
        store.clone(),
        CacheKey::from_iter(["home-cards"]),
        || async {
            Ok::<_, FetchError>(vec![
                "Refer a friend".to_string(),
                "Rates just dropped".to_string(),
            ])
        },
    );
    let cards = home_cards.run().await?;
    if let Some(cards) = cards.data() {
        info!(count = cards.len(), "home cards loaded");
    }

    // The banner query waits for the account to finish opening before it
    // fetches. Spawn it now; the gate releases only once the account entry
    // resolves with a Done status.
    let account_key = CacheKey::from_iter(["account", "u1"]);
    let banner_gate = Gate::entry::<Account, _>(store.clone(), account_key.clone(), |account| {
        account.status == AccountStatus::Done
    });
    let banners = QueryUnit::new(
        store.clone(),
        CacheKey::from_iter(["banners", "u1"]),
        || remote::banners("u1"),
    )
    .with_gate(banner_gate);
    let banner_task = tokio::spawn(async move { banners.run().await });

    // Nothing account-scoped runs while signed out.
    let account_api = Arc::new(AccountApi::new());
    let fetch_account = {
        let api = Arc::clone(&account_api);
        move || {
            let api = Arc::clone(&api);
            async move { api.account().await }
        }
    };
    let account = QueryUnit::new(store.clone(), account_key.clone(), fetch_account)
        .with_gate(Gate::identity(&identity));
    let idle = account.read().await?;
    info!(idle = idle.is_idle(), "account query before sign-in");

    info!("signing in as u1");
    identity.sign_in(Subject::new("u1"));

    let snapshot = account.run().await?;
    if let Some(summary) = snapshot.data() {
        info!(
            name = %summary.display_name,
            balance_cents = summary.balance_cents,
            status = ?summary.status,
            "account loaded"
        );
    }

    // Page through the transaction history, once per filter. Each filter
    // lives under its own key, so switching filters restarts pagination.
    for filter in [
        TransactionFilter::All,
        TransactionFilter::Deposit,
        TransactionFilter::Withdraw,
    ] {
        let history = PaginatedQuery::new(
            store.clone(),
            CacheKey::new("transactions").push("u1").push(filter.as_str()),
            move |cursor| remote::transactions(filter, cursor),
        );
        history.fetch_first().await?;
        while history.state() == PageState::NextReady {
            history.fetch_next().await?;
        }
        let records = history.flattened()?;
        info!(filter = filter.as_str(), total = records.len(), "history complete");
        for t in records {
            info!(id = %t.id, desc = %t.description, cents = t.amount_cents, "transaction");
        }
    }

    // Poll the credit check until it reaches a terminal status. The
    // success callback fires exactly once.
    let check = Arc::new(CreditCheck::new());
    let poll = PollingQuery::new(
        store.clone(),
        CacheKey::from_iter(["credit-check", "u1"]),
        move || {
            let check = Arc::clone(&check);
            async move { check.status().await }
        },
        classify_check_status,
        Duration::from_secs(2),
    )
    .on_success(|status| info!(?status, "credit check complete, score unlocked"))
    .on_error(|err| info!(%err, "credit check failed"));
    let handle = poll.start();
    handle.join().await;

    // The account was still opening on the first read; refetch it to pick
    // up the Done status, which opens the banner gate.
    account.invalidate();
    let refreshed = account.run().await?;
    if let Some(summary) = refreshed.data() {
        info!(status = ?summary.status, "account refreshed");
    }

    let banner_snapshot = banner_task.await??;
    if let Some(banners) = banner_snapshot.data() {
        for b in banners.iter() {
            info!(headline = %b.headline, "banner");
        }
    }

    info!("dashboard warm; all queries settled");
    Ok(())
}
