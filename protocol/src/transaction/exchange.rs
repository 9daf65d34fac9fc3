//! What the two parties send each other.
//!
//! The builder does not move bytes between wallets; it writes its public
//! values to the parameter store and reads the peer's from `Peer*`
//! parameters. [`PeerPacket`] is the bridge: export the public half of one
//! side, ship it however the wallet likes (JSON here), and import it into
//! the other side's scope.
//!
//! Import order matters. Nonce and excess land before the partial
//! signature, and the signature lands last, so a builder that sees
//! `PeerSignature` can rely on everything it was signed over being present.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use crate::storage::{ParamResult, ParameterId, TxParameters};
use crate::transaction::body::{Input, Output};
use crate::transaction::types::TxId;

/// Public values one side hands to the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPacket {
    pub tx_id: TxId,
    pub public_nonce: Option<RistrettoPoint>,
    pub public_excess: Option<RistrettoPoint>,
    pub offset: Option<Scalar>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub partial_signature: Option<Scalar>,
}

impl PeerPacket {
    /// Collect whatever `params` has published so far.
    ///
    /// Inputs, outputs and offset are only shared once the public excess
    /// exists: before that they may still change on a re-run.
    pub fn export(params: &TxParameters) -> ParamResult<Self> {
        let public_excess: Option<RistrettoPoint> = params.get(ParameterId::PublicExcess)?;
        let published = public_excess.is_some();

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut offset = None;
        if published {
            inputs = params.get_or::<Vec<Input>>(ParameterId::Inputs, Vec::new())?;
            inputs.extend(params.get_or::<Vec<Input>>(ParameterId::AssetInputs, Vec::new())?);
            outputs = params.get_or::<Vec<Output>>(ParameterId::Outputs, Vec::new())?;
            outputs.extend(params.get_or::<Vec<Output>>(ParameterId::AssetOutputs, Vec::new())?);
            offset = params.get(ParameterId::Offset)?;
        }

        Ok(Self {
            tx_id: params.tx_id(),
            public_nonce: params.get(ParameterId::PublicNonce)?,
            public_excess,
            offset,
            inputs,
            outputs,
            partial_signature: params.get(ParameterId::PartialSignature)?,
        })
    }

    /// Write the packet into the peer parameters of `params`.
    pub fn import(&self, params: &TxParameters) -> ParamResult<()> {
        if let Some(nonce) = &self.public_nonce {
            params.set(ParameterId::PeerPublicNonce, nonce)?;
        }
        if let Some(excess) = &self.public_excess {
            params.set(ParameterId::PeerPublicExcess, excess)?;
            params.set(ParameterId::PeerInputs, &self.inputs)?;
            params.set(ParameterId::PeerOutputs, &self.outputs)?;
        }
        if let Some(offset) = &self.offset {
            params.set(ParameterId::PeerOffset, offset)?;
        }
        if let Some(signature) = &self.partial_signature {
            params.set_notify(ParameterId::PeerSignature, signature)?;
        }
        Ok(())
    }

    /// Whether the packet carries anything the peer does not have yet.
    pub fn is_empty(&self) -> bool {
        self.public_nonce.is_none() && self.public_excess.is_none() && self.partial_signature.is_none()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
