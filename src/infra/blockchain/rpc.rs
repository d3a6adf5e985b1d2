//! Solana RPC implementation of the operation client.
//!
//! Transfers are signed server-side with material provided by the caller's
//! key resolver. Balance reads batch every owner's associated token accounts
//! into a single `getMultipleAccounts` round trip and stamp records with the
//! response slot.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use tracing::{debug, instrument};

use crate::domain::{AppError, BalanceRecord, BlockchainError, OperationClient};

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub commitment: CommitmentConfig,
    pub request_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Operation client backed by a Solana JSON-RPC endpoint.
pub struct RpcOperationClient {
    rpc: RpcClient,
    commitment: CommitmentConfig,
    /// Mint decimals never change after initialization; cache per mint.
    decimals_cache: DashMap<Pubkey, u8>,
}

impl RpcOperationClient {
    #[must_use]
    pub fn new(rpc_url: &str, config: RpcClientConfig) -> Self {
        let rpc = RpcClient::new_with_timeout_and_commitment(
            rpc_url.to_string(),
            config.request_timeout,
            config.commitment,
        );
        Self {
            rpc,
            commitment: config.commitment,
            decimals_cache: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_defaults(rpc_url: &str) -> Self {
        Self::new(rpc_url, RpcClientConfig::default())
    }

    fn parse_pubkey(address: &str) -> Result<Pubkey, AppError> {
        Pubkey::from_str(address).map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidAddress {
                address: address.to_string(),
                message: e.to_string(),
            })
        })
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8, AppError> {
        if let Some(decimals) = self.decimals_cache.get(mint) {
            return Ok(*decimals);
        }
        let account = self
            .rpc
            .get_account(mint)
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::Rpc(e.to_string())))?;
        let state = spl_token::state::Mint::unpack(&account.data).map_err(|e| {
            AppError::Blockchain(BlockchainError::Rpc(format!(
                "account {mint} is not a token mint: {e}"
            )))
        })?;
        self.decimals_cache.insert(*mint, state.decimals);
        Ok(state.decimals)
    }

    async fn sign_and_send(
        &self,
        instructions: &[solana_sdk::instruction::Instruction],
        signer: &Keypair,
    ) -> Result<String, AppError> {
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::Rpc(e.to_string())))?;
        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&signer.pubkey()),
            &[signer],
            blockhash,
        );
        let signature = self
            .rpc
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::TransactionFailed(e.to_string())))?;
        Ok(signature.to_string())
    }
}

#[async_trait]
impl OperationClient for RpcOperationClient {
    async fn health_check(&self) -> Result<(), AppError> {
        self.rpc
            .get_health()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))
    }

    #[instrument(skip(self, signer), fields(from = %signer.pubkey(), to = %to_address))]
    async fn transfer(
        &self,
        signer: &Keypair,
        to_address: &str,
        amount: u64,
        token_mint: Option<&str>,
    ) -> Result<String, AppError> {
        let destination = Self::parse_pubkey(to_address)?;

        match token_mint {
            None => {
                let instruction = solana_system_interface::instruction::transfer(
                    &signer.pubkey(),
                    &destination,
                    amount,
                );
                let signature = self.sign_and_send(&[instruction], signer).await?;
                debug!(signature = %signature, lamports = amount, "SOL transfer submitted");
                Ok(signature)
            }
            Some(mint_address) => {
                let mint = Self::parse_pubkey(mint_address)?;
                let decimals = self.mint_decimals(&mint).await?;
                let source_ata = get_associated_token_address(&signer.pubkey(), &mint);
                let destination_ata = get_associated_token_address(&destination, &mint);

                let create_ata = create_associated_token_account_idempotent(
                    &signer.pubkey(),
                    &destination,
                    &mint,
                    &spl_token::id(),
                );
                let transfer = spl_token::instruction::transfer_checked(
                    &spl_token::id(),
                    &source_ata,
                    &mint,
                    &destination_ata,
                    &signer.pubkey(),
                    &[],
                    amount,
                    decimals,
                )
                .map_err(|e| {
                    AppError::Blockchain(BlockchainError::TransactionFailed(e.to_string()))
                })?;

                let signature = self.sign_and_send(&[create_ata, transfer], signer).await?;
                debug!(signature = %signature, raw_amount = amount, mint = %mint, "token transfer submitted");
                Ok(signature)
            }
        }
    }

    #[instrument(skip(self, mints), fields(mint_count = mints.len()))]
    async fn fetch_balances(
        &self,
        owner: &str,
        mints: &[String],
    ) -> Result<Vec<BalanceRecord>, AppError> {
        let owner_key = Self::parse_pubkey(owner)?;
        let mint_keys = mints
            .iter()
            .map(|m| Self::parse_pubkey(m))
            .collect::<Result<Vec<_>, _>>()?;
        let token_accounts: Vec<Pubkey> = mint_keys
            .iter()
            .map(|mint| get_associated_token_address(&owner_key, mint))
            .collect();

        let response = self
            .rpc
            .get_multiple_accounts_with_commitment(&token_accounts, self.commitment)
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::Rpc(e.to_string())))?;
        let slot = response.context.slot;
        let observed_at = Utc::now();

        let mut records = Vec::with_capacity(mint_keys.len());
        for (mint, maybe_account) in mint_keys.iter().zip(response.value) {
            let Some(account) = maybe_account else {
                // Owner holds no account for this mint; nothing to record.
                debug!(owner = %owner_key, mint = %mint, "token account absent");
                continue;
            };
            let token = spl_token::state::Account::unpack(&account.data).map_err(|e| {
                AppError::Blockchain(BlockchainError::Rpc(format!(
                    "account data for {mint} is not a token account: {e}"
                )))
            })?;
            let decimals = self.mint_decimals(mint).await?;
            records.push(BalanceRecord::new(
                owner_key.to_string(),
                mint.to_string(),
                token.amount,
                decimals,
                slot,
                observed_at,
            ));
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pubkey_rejects_invalid_input() {
        assert!(RpcOperationClient::parse_pubkey("not-an-address").is_err());
        assert!(RpcOperationClient::parse_pubkey("11111111111111111111111111111111").is_ok());
    }

    #[test]
    fn test_rpc_client_config_defaults() {
        let config = RpcClientConfig::default();
        assert_eq!(config.commitment, CommitmentConfig::confirmed());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
