//! Double ratchet channel integration tests, over both supported
//! stackings.

mod common;

use common::{noise_channel_pair, ratchet_channel_pair, shared_spool, spool_channel_pair};
use mixspool::{
    Channel, ChannelError, DoubleRatchetChannel, NoiseChannel, RatchetError, SpoolChannel,
    USER_FORWARD_PAYLOAD_LENGTH,
};

#[tokio::test]
async fn test_ratchet_key_exchange_and_bidirectional_exchange() {
    let (_, service) = shared_spool();
    let (mut chan_a, mut chan_b) = ratchet_channel_pair(&service).await;

    let a_1 = b"first from a".to_vec();
    let a_2 = b"second from a".to_vec();
    chan_a.write(&a_1).await.unwrap();
    chan_a.write(&a_2).await.unwrap();
    assert_eq!(chan_b.read().await.unwrap(), a_1);
    assert_eq!(chan_b.read().await.unwrap(), a_2);

    let b_1 = b"first from b".to_vec();
    let b_2 = b"second from b".to_vec();
    chan_b.write(&b_1).await.unwrap();
    chan_b.write(&b_2).await.unwrap();
    assert_eq!(chan_a.read().await.unwrap(), b_1);
    assert_eq!(chan_a.read().await.unwrap(), b_2);
}

#[tokio::test]
async fn test_ratchet_ciphertext_is_padded_and_fits_payload_budget() {
    let (mock, service) = shared_spool();
    let (mut chan_a, chan_b) = ratchet_channel_pair(&service).await;

    // Whatever the message size, the stored ciphertext must not vary and
    // must fit a single Sphinx payload.
    let target_spool = chan_b.writer_descriptor().spool_id;
    let max = DoubleRatchetChannel::<SpoolChannel>::max_message_len();

    chan_a.write(b"x").await.unwrap();
    chan_a.write(&vec![0xabu8; max]).await.unwrap();

    let short = mock.stored(&target_spool, 1).unwrap();
    let long = mock.stored(&target_spool, 2).unwrap();

    assert_eq!(short.len(), long.len());
    assert!(short.len() <= USER_FORWARD_PAYLOAD_LENGTH);
}

#[tokio::test]
async fn test_ratchet_save_load_continuity() {
    let (_, service) = shared_spool();
    let (mut chan_a, mut chan_b) = ratchet_channel_pair(&service).await;

    let msg_1 = b"one each way before saving".to_vec();
    chan_a.write(&msg_1).await.unwrap();
    assert_eq!(chan_b.read().await.unwrap(), msg_1);
    chan_b.write(&msg_1).await.unwrap();
    assert_eq!(chan_a.read().await.unwrap(), msg_1);

    let blob = chan_a.save().unwrap();
    let mut chan_c =
        DoubleRatchetChannel::<SpoolChannel>::load(&blob, service.clone()).unwrap();

    // The resumed channel picks up the session exactly where it stopped.
    let msg_2 = b"to the resumed channel".to_vec();
    chan_b.write(&msg_2).await.unwrap();
    assert_eq!(chan_c.read().await.unwrap(), msg_2);

    let msg_3 = b"from the resumed channel".to_vec();
    chan_c.write(&msg_3).await.unwrap();
    assert_eq!(chan_b.read().await.unwrap(), msg_3);
}

#[tokio::test]
async fn test_ratchet_io_before_key_exchange_fails() {
    let (_, service) = shared_spool();
    let (lower_a, mut lower_b) = spool_channel_pair(&service).await;
    let mut chan = DoubleRatchetChannel::new(lower_a);

    assert!(matches!(
        chan.write(b"too early").await,
        Err(ChannelError::Ratchet(RatchetError::KeyExchangeIncomplete))
    ));

    // Reading is refused too, and without consuming anything: the message
    // is still there for the lower channel once the session exists.
    lower_b.write(b"waiting in the spool").await.unwrap();
    assert!(matches!(
        chan.read().await,
        Err(ChannelError::Ratchet(RatchetError::KeyExchangeIncomplete))
    ));
}

#[tokio::test]
async fn test_ratchet_process_key_exchange_twice_fails() {
    let (_, service) = shared_spool();
    let (mut chan_a, mut chan_b) = ratchet_channel_pair(&service).await;

    let kx_b = chan_b.create_key_exchange().unwrap();
    assert!(matches!(
        chan_a.process_key_exchange(&kx_b),
        Err(ChannelError::Ratchet(RatchetError::KeyExchangeComplete))
    ));
}

#[tokio::test]
async fn test_ratchet_message_size_bounds() {
    let (_, service) = shared_spool();
    let (mut chan_a, mut chan_b) = ratchet_channel_pair(&service).await;

    let max = DoubleRatchetChannel::<SpoolChannel>::max_message_len();
    let largest = vec![0x42u8; max];
    chan_a.write(&largest).await.unwrap();
    assert_eq!(chan_b.read().await.unwrap(), largest);

    let oversize = vec![0x42u8; max + 1];
    assert!(matches!(
        chan_a.write(&oversize).await,
        Err(ChannelError::MessageTooLarge { .. })
    ));
}

#[tokio::test]
async fn test_ratchet_over_noise_stacking() {
    let (mock, service) = shared_spool();
    let (lower_a, lower_b) = noise_channel_pair(&service).await;
    let mut chan_a = DoubleRatchetChannel::new(lower_a);
    let mut chan_b = DoubleRatchetChannel::new(lower_b);

    let kx_a = chan_a.create_key_exchange().unwrap();
    let kx_b = chan_b.create_key_exchange().unwrap();
    chan_a.process_key_exchange(&kx_b).unwrap();
    chan_b.process_key_exchange(&kx_a).unwrap();

    let target_spool = chan_b.writer_descriptor().spool.spool_id;

    let msg_1 = b"ratchet inside noise inside spool".to_vec();
    chan_a.write(&msg_1).await.unwrap();
    assert_eq!(chan_b.read().await.unwrap(), msg_1);

    let msg_2 = b"and back again".to_vec();
    chan_b.write(&msg_2).await.unwrap();
    assert_eq!(chan_a.read().await.unwrap(), msg_2);

    // The doubly-wrapped ciphertext still fits the payload budget.
    let stored = mock.stored(&target_spool, 1).unwrap();
    assert!(stored.len() <= USER_FORWARD_PAYLOAD_LENGTH);

    let max = DoubleRatchetChannel::<NoiseChannel>::max_message_len();
    let largest = vec![0x17u8; max];
    chan_a.write(&largest).await.unwrap();
    assert_eq!(chan_b.read().await.unwrap(), largest);
}
