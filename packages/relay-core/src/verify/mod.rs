use log::{debug, warn};
use crate::{
    nonce::derive_message_id,
    types::{ChainId, ReceivedMessage},
    RelayError, Result,
};

/// 源链证明校验，`receive` 在修改任何状态之前调用
///
/// 基线实现不做密码学绑定，完全依赖活跃中继的诚实性与确认法定数；
/// 轻客户端或预言机签名校验应在此接入。
pub trait SourceProofVerifier: Send + Sync {
    fn verify(&self, received: &ReceivedMessage, local_chain_id: ChainId) -> Result<()>;
}

/// 不校验证明
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl SourceProofVerifier for AcceptAllVerifier {
    fn verify(&self, received: &ReceivedMessage, _local_chain_id: ChainId) -> Result<()> {
        debug!("Accepting message {} without proof check", received.message_id);
        Ok(())
    }
}

/// 重新推导消息 ID，拒绝与声明字段不一致的提交
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageIdBindingVerifier;

impl SourceProofVerifier for MessageIdBindingVerifier {
    fn verify(&self, received: &ReceivedMessage, local_chain_id: ChainId) -> Result<()> {
        let expected = derive_message_id(
            received.source_chain_id,
            local_chain_id,
            &received.sender,
            received.origin_nonce,
            received.origin_timestamp,
        );
        if expected != received.message_id {
            warn!(
                "Message id {} does not match claimed origin fields (expected {})",
                received.message_id, expected
            );
            return Err(RelayError::InvalidProof(format!(
                "message id mismatch, expected {}",
                expected
            )));
        }
        Ok(())
    }
}
