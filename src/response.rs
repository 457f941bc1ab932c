use tracing::debug;

use crate::{
    dto::{
        ConnectEventPayload, ConnectItem, ConnectItemReply, DeviceInfo, TonNetwork, TonProof,
        WalletEvent,
    },
    error::WalletError,
};

/// Wallet facts needed for a `ton_addr` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletInfo {
    pub address: String,
    pub network: TonNetwork,
    pub public_key: [u8; 32],
    pub state_init: String,
}

/// One reply per requested item the wallet understands. A proof item without
/// a signed proof at hand and unknown item kinds are left out.
pub fn build(
    id: u64,
    requested: &[ConnectItem],
    wallet: &WalletInfo,
    proof: Option<&TonProof>,
    device: &DeviceInfo,
) -> WalletEvent {
    let items = requested
        .iter()
        .filter_map(|item| match item {
            ConnectItem::TonAddr => Some(ConnectItemReply::TonAddr {
                address: wallet.address.clone(),
                network: wallet.network,
                public_key: hex::encode(wallet.public_key),
                wallet_state_init: wallet.state_init.clone(),
            }),
            ConnectItem::TonProof { .. } => proof.map(|proof| ConnectItemReply::TonProof {
                proof: proof.clone(),
            }),
            ConnectItem::Unsupported => {
                debug!("skipping unsupported connect item");
                None
            }
        })
        .collect();

    WalletEvent::Connect {
        id,
        payload: ConnectEventPayload {
            items,
            device: device.clone(),
        },
    }
}

pub fn build_error(id: u64, error: WalletError) -> WalletEvent {
    WalletEvent::ConnectError { id, payload: error }
}
