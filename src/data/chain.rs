use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::providers::{Middleware, Provider, PubsubClient, Ws};
use ethers::types::{Address, Block, Filter, Log, H256, U256};
use futures::stream::{BoxStream, Stream};
use futures::StreamExt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::task::{Context as TaskContext, Poll};
use tracing::{debug, info, warn};
use crate::data::types::ChainLogEvent;

/// Transport-level reconnects ethers attempts before a provider goes dead.
const WS_RECONNECTS: usize = 5;

/// Where the watcher gets heads and logs from.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Stream of new block numbers. Ends when the underlying subscription does.
    async fn subscribe_heads(&self) -> Result<BoxStream<'static, u64>>;

    async fn latest_block(&self) -> Result<u64>;

    /// Exchange logs carrying one of the watched topics in `[from, to]`,
    /// ordered by (block number, log index).
    async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainLogEvent>>;

    /// Rebuilds the underlying transport. Called before every resubscribe.
    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }
}

pub struct EthersChainSource {
    ws_url: String,
    provider: RwLock<Arc<Provider<Ws>>>,
    exchanges: Vec<Address>,
    topics: Vec<H256>,
}

impl EthersChainSource {
    pub async fn connect(ws_url: &str, exchanges: &[String], topics: Vec<H256>) -> Result<Self> {
        let provider = open_provider(ws_url).await?;

        let exchanges = exchanges
            .iter()
            .map(|a| Address::from_str(a).with_context(|| format!("Invalid exchange address: {}", a)))
            .collect::<Result<Vec<_>>>()?;

        info!("🔗 Connected to Polygon websocket, watching {} exchanges", exchanges.len());
        Ok(Self {
            ws_url: ws_url.to_string(),
            provider: RwLock::new(Arc::new(provider)),
            exchanges,
            topics,
        })
    }

    /// Current provider. Callers keep their handle across a swap.
    fn provider(&self) -> Result<Arc<Provider<Ws>>> {
        self.provider
            .read()
            .map(|p| Arc::clone(&p))
            .map_err(|_| anyhow!("provider lock poisoned"))
    }

    fn filter(&self, from: u64, to: u64) -> Filter {
        Filter::new()
            .address(self.exchanges.clone())
            .topic0(self.topics.clone())
            .from_block(from)
            .to_block(to)
    }
}

async fn open_provider(ws_url: &str) -> Result<Provider<Ws>> {
    Provider::<Ws>::connect_with_reconnects(ws_url, WS_RECONNECTS)
        .await
        .with_context(|| format!("Failed to connect to {}", ws_url))
}

#[async_trait]
impl ChainSource for EthersChainSource {
    async fn subscribe_heads(&self) -> Result<BoxStream<'static, u64>> {
        let provider = self.provider()?;
        let id: U256 = provider
            .request("eth_subscribe", ["newHeads"])
            .await
            .context("newHeads subscription failed")?;
        let transport: &Ws = (*provider).as_ref();
        let notifications = PubsubClient::subscribe(transport, id).context("newHeads subscription not registered")?;

        Ok(HeadStream { provider, id, notifications }.boxed())
    }

    async fn latest_block(&self) -> Result<u64> {
        let number = self
            .provider()?
            .get_block_number()
            .await
            .context("eth_blockNumber failed")?;
        Ok(number.as_u64())
    }

    async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainLogEvent>> {
        let logs = self
            .provider()?
            .get_logs(&self.filter(from, to))
            .await
            .with_context(|| format!("eth_getLogs failed for blocks {}..={}", from, to))?;

        let mut events: Vec<ChainLogEvent> = logs.into_iter().filter_map(to_chain_log).collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        debug!("Fetched {} logs for blocks {}..={}", events.len(), from, to);
        Ok(events)
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = Arc::new(open_provider(&self.ws_url).await?);
        let mut current = self.provider.write().map_err(|_| anyhow!("provider lock poisoned"))?;
        *current = fresh;
        info!("🔗 Rebuilt Polygon websocket transport");
        Ok(())
    }
}

/// `newHeads` notifications that own their provider handle, so the stream
/// outlives a provider swap. Unsubscribes on drop.
struct HeadStream {
    provider: Arc<Provider<Ws>>,
    id: U256,
    notifications: <Ws as PubsubClient>::NotificationStream,
}

impl Stream for HeadStream {
    type Item = u64;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<u64>> {
        loop {
            match self.notifications.poll_next_unpin(cx) {
                Poll::Ready(Some(raw)) => {
                    match serde_json::from_str::<Block<H256>>(raw.get()) {
                        Ok(block) => {
                            if let Some(number) = block.number {
                                return Poll::Ready(Some(number.as_u64()));
                            }
                        }
                        Err(e) => warn!("Undecodable newHeads notification: {}", e),
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for HeadStream {
    fn drop(&mut self) {
        let transport: &Ws = (*self.provider).as_ref();
        let _ = PubsubClient::unsubscribe(transport, self.id);
    }
}

/// Drops pending and reorged-out logs, which lack stable coordinates.
fn to_chain_log(log: Log) -> Option<ChainLogEvent> {
    if log.removed == Some(true) {
        return None;
    }
    Some(ChainLogEvent {
        address: log.address,
        topics: log.topics,
        data: log.data.to_vec(),
        block_number: log.block_number?.as_u64(),
        transaction_hash: log.transaction_hash?,
        log_index: log.log_index?.as_u64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, U256, U64};

    fn raw_log() -> Log {
        Log {
            address: Address::repeat_byte(0x4b),
            topics: vec![H256::repeat_byte(1)],
            data: Bytes::from(vec![1u8, 2, 3]),
            block_number: Some(U64::from(42)),
            transaction_hash: Some(H256::repeat_byte(9)),
            log_index: Some(U256::from(3)),
            ..Default::default()
        }
    }

    #[test]
    fn test_log_conversion_keeps_coordinates() {
        let event = to_chain_log(raw_log()).unwrap();

        assert_eq!(event.block_number, 42);
        assert_eq!(event.log_index, 3);
        assert_eq!(event.transaction_hash, H256::repeat_byte(9));
        assert_eq!(event.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_pending_and_removed_logs_are_dropped() {
        let pending = Log { block_number: None, ..raw_log() };
        assert!(to_chain_log(pending).is_none());

        let removed = Log { removed: Some(true), ..raw_log() };
        assert!(to_chain_log(removed).is_none());
    }
}
