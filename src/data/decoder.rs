use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use crate::data::types::{ChainLogEvent, DecodedEvent, DecodedFillEvent, DecodedMatchEvent};

pub const ORDER_FILLED_SIGNATURE: &str =
    "OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)";
pub const ORDERS_MATCHED_SIGNATURE: &str =
    "OrdersMatched(bytes32,address,uint256,uint256,uint256,uint256)";

const WORD: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingSignature,

    #[error("unrecognized event signature {0:#x}")]
    UnknownEvent(H256),

    #[error("{event} expects {expected} topics, found {found}")]
    TopicCount {
        event: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{event} payload is {found} bytes, need at least {expected}")]
    ShortPayload {
        event: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("abi decode failed: {0}")]
    Abi(String),
}

/// Selects a decoder from topic 0 and turns exchange logs into typed events.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    order_filled: H256,
    orders_matched: H256,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            order_filled: H256::from(keccak256(ORDER_FILLED_SIGNATURE.as_bytes())),
            orders_matched: H256::from(keccak256(ORDERS_MATCHED_SIGNATURE.as_bytes())),
        }
    }

    /// Topic-0 values for the log filter.
    pub fn topics(&self) -> Vec<H256> {
        vec![self.order_filled, self.orders_matched]
    }

    pub fn order_filled_topic(&self) -> H256 {
        self.order_filled
    }

    pub fn orders_matched_topic(&self) -> H256 {
        self.orders_matched
    }

    pub fn decode(&self, log: &ChainLogEvent) -> Result<DecodedEvent, DecodeError> {
        let signature = log.topics.first().ok_or(DecodeError::MissingSignature)?;

        if *signature == self.order_filled {
            self.decode_fill(log).map(DecodedEvent::Fill)
        } else if *signature == self.orders_matched {
            self.decode_match(log).map(DecodedEvent::BatchMatch)
        } else {
            Err(DecodeError::UnknownEvent(*signature))
        }
    }

    fn decode_fill(&self, log: &ChainLogEvent) -> Result<DecodedFillEvent, DecodeError> {
        if log.topics.len() != 4 {
            return Err(DecodeError::TopicCount {
                event: "OrderFilled",
                expected: 4,
                found: log.topics.len(),
            });
        }

        // data: makerAssetId, takerAssetId, makerAmountFilled, takerAmountFilled, fee
        let words = decode_uints("OrderFilled", &log.data, 5)?;

        Ok(DecodedFillEvent {
            transaction_hash: log.transaction_hash,
            block_number: log.block_number,
            log_index: log.log_index,
            order_hash: log.topics[1],
            maker: topic_address(&log.topics[2]),
            taker: topic_address(&log.topics[3]),
            maker_asset_id: words[0],
            taker_asset_id: words[1],
            maker_amount_filled: words[2],
            taker_amount_filled: words[3],
            fee: words[4],
        })
    }

    fn decode_match(&self, log: &ChainLogEvent) -> Result<DecodedMatchEvent, DecodeError> {
        // takerOrderMaker is indexed on the deployed exchange; older ABIs carry
        // it as the first data word instead.
        let (taker_order_maker, words) = match log.topics.len() {
            3 => (
                topic_address(&log.topics[2]),
                decode_uints("OrdersMatched", &log.data, 4)?,
            ),
            2 => {
                let tokens = decode_words(
                    "OrdersMatched",
                    &log.data,
                    &[
                        ParamType::Address,
                        ParamType::Uint(256),
                        ParamType::Uint(256),
                        ParamType::Uint(256),
                        ParamType::Uint(256),
                    ],
                )?;
                let mut tokens = tokens.into_iter();
                let maker = tokens
                    .next()
                    .and_then(Token::into_address)
                    .ok_or_else(|| DecodeError::Abi("takerOrderMaker is not an address".into()))?;
                (maker, collect_uints(tokens)?)
            }
            found => {
                return Err(DecodeError::TopicCount {
                    event: "OrdersMatched",
                    expected: 3,
                    found,
                })
            }
        };

        Ok(DecodedMatchEvent {
            transaction_hash: log.transaction_hash,
            taker_order_hash: log.topics[1],
            taker_order_maker,
            maker_asset_id: words[0],
            taker_asset_id: words[1],
            maker_amount_filled: words[2],
            taker_amount_filled: words[3],
        })
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..32]) // last 20 bytes
}

fn decode_words(
    event: &'static str,
    data: &[u8],
    layout: &[ParamType],
) -> Result<Vec<Token>, DecodeError> {
    let expected = layout.len() * WORD;
    if data.len() < expected {
        return Err(DecodeError::ShortPayload {
            event,
            expected,
            found: data.len(),
        });
    }
    abi::decode(layout, data).map_err(|e| DecodeError::Abi(e.to_string()))
}

fn decode_uints(event: &'static str, data: &[u8], count: usize) -> Result<Vec<U256>, DecodeError> {
    let layout = vec![ParamType::Uint(256); count];
    let tokens = decode_words(event, data, &layout)?;
    collect_uints(tokens)
}

fn collect_uints(tokens: impl IntoIterator<Item = Token>) -> Result<Vec<U256>, DecodeError> {
    tokens
        .into_iter()
        .map(|t| t.into_uint().ok_or_else(|| DecodeError::Abi("expected uint256".into())))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn address_topic(addr: Address) -> H256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_bytes());
        H256::from(word)
    }

    pub(crate) fn encode_words(words: &[U256]) -> Vec<u8> {
        abi::encode(&words.iter().map(|w| Token::Uint(*w)).collect::<Vec<_>>())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fill_log(
        decoder: &EventDecoder,
        block_number: u64,
        log_index: u64,
        tx: H256,
        order_hash: H256,
        maker: Address,
        taker: Address,
        words: [u64; 5],
    ) -> ChainLogEvent {
        ChainLogEvent {
            address: Address::repeat_byte(0x4b),
            topics: vec![
                decoder.order_filled_topic(),
                order_hash,
                address_topic(maker),
                address_topic(taker),
            ],
            data: encode_words(&words.map(U256::from)),
            block_number,
            transaction_hash: tx,
            log_index,
        }
    }

    #[test]
    fn test_signature_hashes_are_distinct() {
        let decoder = EventDecoder::new();
        assert_ne!(decoder.order_filled_topic(), decoder.orders_matched_topic());
        assert_eq!(decoder.topics().len(), 2);
    }

    #[test]
    fn test_decode_fill() {
        let decoder = EventDecoder::new();
        let maker = Address::repeat_byte(0xaa);
        let taker = Address::repeat_byte(0xbb);
        let log = fill_log(
            &decoder,
            100,
            3,
            H256::repeat_byte(1),
            H256::repeat_byte(2),
            maker,
            taker,
            [0, 77, 10_000_000, 20, 5],
        );

        let DecodedEvent::Fill(fill) = decoder.decode(&log).unwrap() else {
            panic!("expected fill");
        };
        assert_eq!(fill.order_hash, H256::repeat_byte(2));
        assert_eq!(fill.maker, maker);
        assert_eq!(fill.taker, taker);
        assert_eq!(fill.maker_asset_id, U256::zero());
        assert_eq!(fill.taker_asset_id, U256::from(77));
        assert_eq!(fill.maker_amount_filled, U256::from(10_000_000u64));
        assert_eq!(fill.taker_amount_filled, U256::from(20));
        assert_eq!(fill.fee, U256::from(5));
        assert_eq!(fill.block_number, 100);
        assert_eq!(fill.log_index, 3);
    }

    #[test]
    fn test_decode_match_with_indexed_maker() {
        let decoder = EventDecoder::new();
        let maker = Address::repeat_byte(0xcc);
        let log = ChainLogEvent {
            address: Address::repeat_byte(0x4b),
            topics: vec![decoder.orders_matched_topic(), H256::repeat_byte(9), address_topic(maker)],
            data: encode_words(&[U256::zero(), U256::from(42), U256::from(1_000), U256::from(2_000)]),
            block_number: 1,
            transaction_hash: H256::repeat_byte(3),
            log_index: 0,
        };

        let DecodedEvent::BatchMatch(m) = decoder.decode(&log).unwrap() else {
            panic!("expected batch match");
        };
        assert_eq!(m.taker_order_maker, maker);
        assert_eq!(m.taker_asset_id, U256::from(42));
        assert_eq!(m.taker_amount_filled, U256::from(2_000));
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let decoder = EventDecoder::new();
        let mut log = fill_log(
            &decoder,
            1,
            0,
            H256::zero(),
            H256::zero(),
            Address::zero(),
            Address::zero(),
            [0, 1, 2, 3, 4],
        );
        log.data.truncate(100);

        assert_eq!(
            decoder.decode(&log),
            Err(DecodeError::ShortPayload { event: "OrderFilled", expected: 160, found: 100 })
        );
    }

    #[test]
    fn test_unknown_and_missing_topics() {
        let decoder = EventDecoder::new();
        let mut log = fill_log(
            &decoder,
            1,
            0,
            H256::zero(),
            H256::zero(),
            Address::zero(),
            Address::zero(),
            [0, 1, 2, 3, 4],
        );

        log.topics[0] = H256::repeat_byte(0xee);
        assert_eq!(decoder.decode(&log), Err(DecodeError::UnknownEvent(H256::repeat_byte(0xee))));

        log.topics.clear();
        assert_eq!(decoder.decode(&log), Err(DecodeError::MissingSignature));
    }

    #[test]
    fn test_fill_with_missing_indexed_topic() {
        let decoder = EventDecoder::new();
        let mut log = fill_log(
            &decoder,
            1,
            0,
            H256::zero(),
            H256::zero(),
            Address::zero(),
            Address::zero(),
            [0, 1, 2, 3, 4],
        );
        log.topics.pop();

        assert!(matches!(
            decoder.decode(&log),
            Err(DecodeError::TopicCount { expected: 4, found: 3, .. })
        ));
    }
}
