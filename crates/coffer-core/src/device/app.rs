//! Application-mode dispatch table and handlers.
//!
//! Handlers never write to the wire on their own error paths; they return
//! [`Interrupt`] and the dispatcher serializes the `Failure`. Success
//! replies are queued inline.

use coffer_crypto::{address, cipher, message_sign, mnemonic};
use coffer_proto::{
    messages::{
        cosmos::{CosmosSignTx, CosmosTxAck},
        device::{ApplySettings, ButtonRequestType, ChangePin, Entropy as EntropyReply, GetEntropy, Ping},
        ethereum::{
            EthereumAddress, EthereumGetAddress, EthereumMessageSignature, EthereumSignMessage,
            EthereumSignTx, EthereumTxAck, EthereumVerifyMessage,
        },
        keys::{
            Address, CipherKeyValue, CipheredKeyValue, DecryptMessage, DecryptedMessage,
            EncryptMessage, EncryptedMessage, GetAddress, GetPublicKey, HdNodeType,
            InputScriptType, MessageSignature, PublicKey, SignMessage, VerifyMessage,
        },
        provision::{EntropyAck, LoadDevice, RecoveryDevice, ResetDevice, WordAck},
        tx::{EstimateTxSize, SignTx, TxAck, TxSize},
    },
    FailureCode, Message,
};

use super::{ConfirmGate, Device, Interrupt, Screen};
use crate::{
    clock::DeviceInstant,
    coins::{self, PathCheck},
    entropy::Entropy,
    flash::Flash,
    recovery::{CipherRecovery, RecoverySession, RecoverySettings, WordRecovery},
    reset::ResetSession,
    sign::{ActiveSigner, BitcoinSigner, CosmosSigner, EthereumSigner},
    storage::StoredNode,
};

/// Largest `GetEntropy` reply.
const ENTROPY_BUFFER: usize = 1024;

impl<F: Flash, E: Entropy, I: DeviceInstant> Device<F, E, I> {
    pub(super) fn dispatch_app(&mut self, message: &Message, now: I) -> Result<(), Interrupt> {
        // Signing owns the wire: anything that is not its ack tears the
        // session down before normal handling.
        if self.signer.is_some()
            && !matches!(
                message,
                Message::TxAck(_) | Message::EthereumTxAck(_) | Message::CosmosTxAck(_)
            )
        {
            tracing::warn!("signing interrupted by unrelated message");
            self.signer = None;
        }

        match message {
            Message::Ping(msg) => self.msg_ping(msg, now),
            Message::ChangePin(msg) => self.msg_change_pin(msg, now),
            Message::WipeDevice => self.msg_wipe_device(),
            Message::GetEntropy(msg) => self.msg_get_entropy(msg),
            Message::GetPublicKey(msg) => self.msg_get_public_key(msg),
            Message::LoadDevice(msg) => self.msg_load_device(msg),
            Message::ResetDevice(msg) => self.msg_reset_device(msg),
            Message::EntropyAck(msg) => self.msg_entropy_ack(msg),
            Message::SignTx(msg) => self.msg_sign_tx(msg, now),
            Message::TxAck(msg) => self.msg_tx_ack(msg),
            Message::EstimateTxSize(msg) => self.msg_estimate_tx_size(msg),
            Message::ApplySettings(msg) => self.msg_apply_settings(msg, now),
            Message::CipherKeyValue(msg) => self.msg_cipher_key_value(msg, now),
            Message::ClearSession => self.msg_clear_session(),
            Message::GetAddress(msg) => self.msg_get_address(msg),
            Message::SignMessage(msg) => self.msg_sign_message(msg, now),
            Message::VerifyMessage(msg) => self.msg_verify_message(msg),
            Message::EncryptMessage(msg) => self.msg_encrypt_message(msg, now),
            Message::DecryptMessage(msg) => self.msg_decrypt_message(msg, now),
            Message::RecoveryDevice(msg) => self.msg_recovery_device(msg),
            Message::WordAck(msg) => self.msg_word_ack(msg),
            Message::CharacterAck(msg) => self.msg_character_ack(&msg.character),
            Message::CharacterDeleteAck => self.msg_character_delete(),
            Message::CharacterFinalAck => self.msg_character_final(),
            Message::EthereumGetAddress(msg) => self.msg_ethereum_get_address(msg, now),
            Message::EthereumSignTx(msg) => self.msg_ethereum_sign_tx(msg, now),
            Message::EthereumTxAck(msg) => self.msg_ethereum_tx_ack(msg),
            Message::EthereumSignMessage(msg) => self.msg_ethereum_sign_message(msg, now),
            Message::EthereumVerifyMessage(msg) => self.msg_ethereum_verify_message(msg),
            Message::CosmosSignTx(msg) => self.msg_cosmos_sign_tx(msg, now),
            Message::CosmosTxAck(msg) => self.msg_cosmos_tx_ack(msg),
            Message::FirmwareErase => Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Not in bootloader mode",
            )),
            #[cfg(feature = "debug-link")]
            Message::DebugLinkGetState => self.msg_debug_link_get_state(),
            #[cfg(feature = "debug-link")]
            Message::DebugLinkStop => Ok(()),
            _ => Err(Interrupt::failed(FailureCode::UnexpectedMessage, "Unknown message")),
        }
    }

    #[cfg(feature = "debug-link")]
    fn msg_debug_link_get_state(&mut self) -> Result<(), Interrupt> {
        use coffer_proto::messages::debug::DebugLinkState;

        let record = self.storage_ref()?.record();
        let state = DebugLinkState {
            pin: record.has_pin().then(|| record.pin()),
            mnemonic: record.mnemonic(),
            node: record.node().map(|n| HdNodeType {
                depth: n.depth(),
                fingerprint: n.fingerprint(),
                child_num: n.child_num(),
                chain_code: n.chain_code.to_vec(),
                private_key: Some(n.private_key.to_vec()),
                public_key: Some(n.public_key.to_vec()),
            }),
            passphrase_protection: Some(record.passphrase_protection()),
            ..Default::default()
        };
        self.queue(Message::DebugLinkState(Box::new(state)));
        Ok(())
    }

    fn msg_ping(&mut self, msg: &Ping, now: I) -> Result<(), Interrupt> {
        if msg.button_protection.unwrap_or(false) {
            self.confirm(
                ButtonRequestType::ProtectCall,
                "Ping",
                msg.message.as_deref().unwrap_or(""),
            )?;
        }
        if msg.pin_protection.unwrap_or(false) {
            self.require_pin(now)?;
        }
        if msg.passphrase_protection.unwrap_or(false) {
            self.require_passphrase()?;
        }
        self.send_success(msg.message.as_deref().unwrap_or(""));
        self.go_home();
        Ok(())
    }

    fn msg_change_pin(&mut self, msg: &ChangePin, now: I) -> Result<(), Interrupt> {
        let removal = msg.remove.unwrap_or(false);
        let has_pin = self.storage_ref()?.record().has_pin();

        if removal {
            if !has_pin {
                self.send_success("PIN removed");
                return Ok(());
            }
            self.confirm(
                ButtonRequestType::ProtectCall,
                "Remove PIN",
                "Do you want to remove PIN protection?",
            )?;
            self.require_pin_fresh(now)?;
            self.storage_mut_checked()?.record_mut().set_pin(None);
            self.commit_storage()?;
            self.send_success("PIN removed");
            self.go_home();
            return Ok(());
        }

        if has_pin {
            self.confirm(
                ButtonRequestType::ProtectCall,
                "Change PIN",
                "Do you want to change your PIN?",
            )?;
        } else {
            self.confirm(
                ButtonRequestType::ProtectCall,
                "Create PIN",
                "Do you want to add PIN protection?",
            )?;
        }
        self.require_pin_fresh(now)?;
        let new_pin = self.request_new_pin()?;
        self.storage_mut_checked()?.record_mut().set_pin(Some(&new_pin));
        self.commit_storage()?;
        self.send_success("PIN changed");
        self.go_home();
        Ok(())
    }

    fn msg_wipe_device(&mut self) -> Result<(), Interrupt> {
        self.confirm(
            ButtonRequestType::WipeDevice,
            "Wipe Device",
            "Do you want to erase your private keys and settings?",
        )?;
        self.go_home();
        let Some(storage) = self.storage.as_mut() else {
            return Err(Interrupt::other("Storage unavailable"));
        };
        storage
            .wipe(&mut self.flash, &mut self.entropy)
            .map_err(|e| Interrupt::other(format!("Wipe failed: {e}")))?;
        self.session.clear();
        self.send_success("Device wiped");
        Ok(())
    }

    fn msg_get_entropy(&mut self, msg: &GetEntropy) -> Result<(), Interrupt> {
        self.confirm(
            ButtonRequestType::ProtectCall,
            "Generate Entropy",
            "Do you want to generate and return entropy using the hardware RNG?",
        )?;
        let len = (msg.size as usize).min(ENTROPY_BUFFER);
        let mut bytes = vec![0u8; len];
        self.entropy.fill(&mut bytes);
        self.queue(Message::Entropy(EntropyReply { entropy: bytes }));
        self.go_home();
        Ok(())
    }

    fn msg_get_public_key(&mut self, msg: &GetPublicKey) -> Result<(), Interrupt> {
        let mut node = self.root_clone()?;
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }
        let reply = PublicKey {
            node: HdNodeType {
                depth: node.depth,
                fingerprint: node.fingerprint,
                child_num: node.child_num,
                chain_code: node.chain_code.to_vec(),
                private_key: None,
                public_key: Some(node.public_key.to_vec()),
            },
            xpub: Some(node.serialize_xpub()),
        };
        self.queue(Message::PublicKey(reply));
        self.go_home();
        Ok(())
    }

    fn msg_load_device(&mut self, msg: &LoadDevice) -> Result<(), Interrupt> {
        if self.storage_ref()?.record().is_initialized() {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Device is already initialized. Use Wipe first.",
            ));
        }
        self.confirm(
            ButtonRequestType::ProtectCall,
            "Import Seed",
            "Importing a seed over USB is intended for testing only. Continue?",
        )?;

        if let Some(sentence) = &msg.mnemonic {
            if !msg.skip_checksum.unwrap_or(false) {
                mnemonic::check(sentence).map_err(|_| {
                    Interrupt::failed(
                        FailureCode::ActionCancelled,
                        "Mnemonic with wrong checksum provided",
                    )
                })?;
            }
        } else if msg.node.is_none() {
            return Err(Interrupt::failed(
                FailureCode::SyntaxError,
                "No seed provided",
            ));
        }

        self.go_home();
        let storage = self.storage_mut_checked()?;
        let record = storage.record_mut();
        record.reset();
        record.set_imported(true);
        if let Some(sentence) = &msg.mnemonic {
            record.set_mnemonic(sentence);
        } else if let Some(node) = &msg.node {
            let mut stored = zerocopy::FromZeros::new_zeroed();
            let stored_ref: &mut StoredNode = &mut stored;
            stored_ref.set_meta(node.depth, node.fingerprint, node.child_num);
            if node.chain_code.len() != 32 {
                return Err(Interrupt::failed(FailureCode::SyntaxError, "Invalid chain code"));
            }
            stored_ref.chain_code.copy_from_slice(&node.chain_code);
            match node.private_key.as_deref() {
                Some(key) if key.len() == 32 => stored_ref.private_key.copy_from_slice(key),
                _ => {
                    return Err(Interrupt::failed(
                        FailureCode::SyntaxError,
                        "Node needs a 32-byte private key",
                    ))
                }
            }
            if let Some(public) = node.public_key.as_deref() {
                if public.len() == 33 {
                    stored_ref.public_key.copy_from_slice(public);
                }
            }
            record.set_node(stored);
        }
        record.set_passphrase_protection(msg.passphrase_protection.unwrap_or(false));
        if let Some(language) = &msg.language {
            record.set_language(language);
        }
        if let Some(label) = &msg.label {
            record.set_label(label);
        }
        if let Some(pin) = &msg.pin {
            record.set_pin(Some(pin));
        }
        self.session.clear();
        self.commit_storage()?;
        self.send_success("Device loaded");
        Ok(())
    }

    fn msg_reset_device(&mut self, msg: &ResetDevice) -> Result<(), Interrupt> {
        if self.storage_ref()?.record().is_initialized() {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Device is already initialized. Use Wipe first.",
            ));
        }
        self.confirm(
            ButtonRequestType::ResetDevice,
            "Create New Wallet",
            "Do you want to create a new wallet on this device?",
        )?;

        // Internal entropy is drawn exactly once, then the flow survives
        // parked replays untouched.
        let flow = match &self.reset_flow {
            Some(flow) => flow.clone(),
            None => {
                let flow = ResetSession::new(msg, &mut self.entropy)?;
                self.reset_flow = Some(flow.clone());
                flow
            }
        };
        if flow.display_random {
            self.review(
                ButtonRequestType::ResetDevice,
                "Internal Entropy",
                &hex::encode(flow.internal_entropy()),
            )?;
        }
        self.queue(Message::EntropyRequest);
        Ok(())
    }

    fn msg_entropy_ack(&mut self, msg: &EntropyAck) -> Result<(), Interrupt> {
        let Some(flow) = self.reset_flow.clone() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Device reset not in progress",
            ));
        };
        let external = msg.entropy.clone().unwrap_or_default();
        let sentence = flow.mnemonic_from(&external)?;

        self.push_display(Screen::Words { sentence: sentence.clone() });
        self.confirm(
            ButtonRequestType::ConfirmWord,
            "Recovery Sentence",
            "Write down your recovery sentence and confirm once it is safe",
        )?;

        let new_pin = if flow.pin_protection && !self.storage_ref()?.record().has_pin() {
            Some(self.request_new_pin()?)
        } else {
            None
        };

        let storage = self.storage_mut_checked()?;
        let record = storage.record_mut();
        record.set_mnemonic(&sentence);
        record.set_imported(false);
        record.set_passphrase_protection(flow.passphrase_protection);
        if let Some(language) = &flow.language {
            record.set_language(language);
        }
        if let Some(label) = &flow.label {
            record.set_label(label);
        }
        if let Some(pin) = &new_pin {
            record.set_pin(Some(pin));
        }
        self.session.clear();
        self.commit_storage()?;
        self.reset_flow = None;
        self.send_success("Device reset");
        self.go_home();
        Ok(())
    }

    fn msg_sign_tx(&mut self, msg: &SignTx, now: I) -> Result<(), Interrupt> {
        self.require_pin(now)?;
        let root = self.root_clone()?;
        let coin = coins::by_name(msg.coin_name.as_deref().unwrap_or("Bitcoin"))
            .ok_or_else(|| Interrupt::other("Invalid coin name"))?;
        let exchange_enabled = self.storage_ref()?.record().policy_enabled("ShapeShift");

        let (signer, first) = BitcoinSigner::start(msg, coin, root, exchange_enabled)?;
        self.signer = Some(ActiveSigner::Bitcoin(Box::new(signer)));
        tracing::info!(
            inputs = msg.inputs_count,
            outputs = msg.outputs_count,
            coin = coin.name,
            "transaction signing started"
        );
        self.queue(first);
        Ok(())
    }

    fn msg_tx_ack(&mut self, msg: &TxAck) -> Result<(), Interrupt> {
        let Some(ActiveSigner::Bitcoin(mut signer)) = self.signer.take() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Signing not in progress",
            ));
        };
        let Some(tx) = &msg.tx else {
            self.signer = Some(ActiveSigner::Bitcoin(signer));
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No transaction provided"));
        };

        match signer.tx_ack(self, tx) {
            Ok(reply) => {
                if signer.finished() {
                    self.go_home();
                } else {
                    self.signer = Some(ActiveSigner::Bitcoin(signer));
                }
                self.queue(reply);
                Ok(())
            }
            Err(Interrupt::Pending) => {
                self.signer = Some(ActiveSigner::Bitcoin(signer));
                Err(Interrupt::Pending)
            }
            Err(failed) => Err(failed),
        }
    }

    fn msg_estimate_tx_size(&mut self, msg: &EstimateTxSize) -> Result<(), Interrupt> {
        let size = coins::estimate_tx_size(msg.inputs_count, msg.outputs_count);
        self.queue(Message::TxSize(TxSize { tx_size: Some(size) }));
        Ok(())
    }

    fn msg_apply_settings(&mut self, msg: &ApplySettings, now: I) -> Result<(), Interrupt> {
        if msg.label.is_none() && msg.language.is_none() && msg.use_passphrase.is_none() {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No setting provided"));
        }
        if let Some(label) = &msg.label {
            self.confirm(
                ButtonRequestType::ProtectCall,
                "Change Label",
                &format!("Do you want to change the label to \"{label}\"?"),
            )?;
        }
        if let Some(language) = &msg.language {
            self.confirm(
                ButtonRequestType::ProtectCall,
                "Change Language",
                &format!("Do you want to change the language to {language}?"),
            )?;
        }
        if let Some(use_passphrase) = msg.use_passphrase {
            let body = if use_passphrase {
                "Do you want to enable a passphrase?"
            } else {
                "Do you want to disable the passphrase?"
            };
            self.confirm(ButtonRequestType::ProtectCall, "Passphrase", body)?;
        }
        self.require_pin(now)?;

        let record = self.storage_mut_checked()?.record_mut();
        if let Some(label) = &msg.label {
            record.set_label(label);
        }
        if let Some(language) = &msg.language {
            record.set_language(language);
        }
        if let Some(use_passphrase) = msg.use_passphrase {
            record.set_passphrase_protection(use_passphrase);
        }
        self.go_home();
        self.commit_storage()?;
        self.send_success("Settings applied");
        Ok(())
    }

    fn msg_cipher_key_value(&mut self, msg: &CipherKeyValue, now: I) -> Result<(), Interrupt> {
        let Some(key_label) = &msg.key else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No key provided"));
        };
        let Some(value) = &msg.value else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No value provided"));
        };
        if value.is_empty() || value.len() % 16 != 0 {
            return Err(Interrupt::failed(
                FailureCode::SyntaxError,
                "Value length must be a multiple of 16",
            ));
        }
        self.require_pin(now)?;
        let mut node = self.root_clone()?;
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }

        let encrypt = msg.encrypt.unwrap_or(false);
        let ask_on_encrypt = msg.ask_on_encrypt.unwrap_or(false);
        let ask_on_decrypt = msg.ask_on_decrypt.unwrap_or(false);
        if (encrypt && ask_on_encrypt) || (!encrypt && ask_on_decrypt) {
            let title = if encrypt { "Encrypt Value" } else { "Decrypt Value" };
            self.confirm(ButtonRequestType::ProtectCall, title, key_label)?;
        }

        let result = cipher::key_value(
            node.private_key(),
            key_label,
            value,
            encrypt,
            ask_on_encrypt,
            ask_on_decrypt,
        )
        .map_err(|e| Interrupt::failed(FailureCode::SyntaxError, e.to_string()))?;
        self.queue(Message::CipheredKeyValue(CipheredKeyValue { value: Some(result) }));
        self.go_home();
        Ok(())
    }

    fn msg_clear_session(&mut self) -> Result<(), Interrupt> {
        self.session.clear();
        self.send_success("Session cleared");
        Ok(())
    }

    fn msg_get_address(&mut self, msg: &GetAddress) -> Result<(), Interrupt> {
        let root = self.root_clone()?;
        let coin = coins::by_name(msg.coin_name.as_deref().unwrap_or("Bitcoin"))
            .ok_or_else(|| Interrupt::other("Invalid coin name"))?;
        let mut node = root;
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }
        let script_type = msg.script_type.unwrap_or(InputScriptType::SpendAddress);

        if let PathCheck::Unusual(reason) = coins::check_path(coin, &msg.address_n, script_type) {
            self.confirm(
                ButtonRequestType::Other,
                "Unusual Path",
                &format!("{reason}. Use this path anyway?"),
            )?;
        }

        let encoded = if let Some(multisig) = &msg.multisig {
            if !multisig.pubkeys.iter().any(|k| k[..] == node.public_key[..]) {
                return Err(Interrupt::other("Pubkey not found in multisig script"));
            }
            let keys: Vec<Vec<u8>> = multisig.pubkeys.iter().map(|k| k.to_vec()).collect();
            let redeem = address::multisig_redeem_script(&keys, multisig.m)
                .map_err(|_| Interrupt::other("Invalid multisig script"))?;
            address::p2sh(&address::hash160(&redeem), coin.address_type_p2sh)
        } else {
            match script_type {
                InputScriptType::SpendAddress => {
                    address::p2pkh(&node.public_key, coin.address_type)
                }
                InputScriptType::SpendWitness => {
                    let hrp = coin
                        .bech32_hrp
                        .ok_or_else(|| Interrupt::other("Coin does not support native segwit"))?;
                    address::segwit_v0(hrp, &address::hash160(&node.public_key))
                        .map_err(|_| Interrupt::other("Address encoding failed"))?
                }
                InputScriptType::SpendP2ShWitness => {
                    if !coin.segwit {
                        return Err(Interrupt::other("Coin does not support segwit"));
                    }
                    let mut witness = vec![0x00, 0x14];
                    witness.extend_from_slice(&address::hash160(&node.public_key));
                    address::p2sh(&address::hash160(&witness), coin.address_type_p2sh)
                }
                InputScriptType::SpendMultisig => {
                    return Err(Interrupt::failed(
                        FailureCode::SyntaxError,
                        "Multisig address needs a redeem script",
                    ))
                }
            }
        };

        if msg.show_display.unwrap_or(false) {
            self.confirm(ButtonRequestType::Address, "Confirm Address", &encoded)?;
        }
        self.queue(Message::Address(Address { address: encoded }));
        self.go_home();
        Ok(())
    }

    fn msg_sign_message(&mut self, msg: &SignMessage, now: I) -> Result<(), Interrupt> {
        let shown = String::from_utf8_lossy(&msg.message).into_owned();
        self.confirm(ButtonRequestType::ProtectCall, "Sign Message", &shown)?;
        self.require_pin(now)?;

        let coin = coins::by_name(msg.coin_name.as_deref().unwrap_or("Bitcoin"))
            .ok_or_else(|| Interrupt::other("Invalid coin name"))?;
        let mut node = self.root_clone()?;
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }

        let signature = message_sign::bitcoin_sign(node.private_key(), &msg.message)
            .map_err(|_| Interrupt::other("Error signing message"))?;
        let reply = MessageSignature {
            address: Some(address::p2pkh(&node.public_key, coin.address_type)),
            signature: Some(signature.to_vec()),
        };
        self.queue(Message::MessageSignature(reply));
        self.go_home();
        Ok(())
    }

    fn msg_verify_message(&mut self, msg: &VerifyMessage) -> Result<(), Interrupt> {
        let Some(claimed) = &msg.address else {
            return Err(Interrupt::other("No address provided"));
        };
        let Some(message) = &msg.message else {
            return Err(Interrupt::other("No message provided"));
        };
        let Some(signature) = &msg.signature else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No signature provided"));
        };
        let coin = coins::by_name(msg.coin_name.as_deref().unwrap_or("Bitcoin"))
            .ok_or_else(|| Interrupt::other("Invalid coin name"))?;

        self.push_display(Screen::Notify {
            title: "Verifying Message".into(),
            body: String::new(),
        });
        if message_sign::bitcoin_verify(coin.address_type, claimed, message, signature).is_err() {
            return Err(Interrupt::failed(FailureCode::InvalidSignature, "Invalid signature"));
        }
        let shown = String::from_utf8_lossy(message).into_owned();
        self.review(ButtonRequestType::Other, "Message Verified", &shown)?;
        self.send_success("Message verified");
        self.go_home();
        Ok(())
    }

    fn msg_encrypt_message(&mut self, msg: &EncryptMessage, now: I) -> Result<(), Interrupt> {
        let Some(pubkey) = &msg.pubkey else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No public key provided"));
        };
        let Some(plaintext) = &msg.message else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No message provided"));
        };
        if pubkey.len() != 33 {
            return Err(Interrupt::failed(
                FailureCode::SyntaxError,
                "Invalid public key provided",
            ));
        }

        let display_only = msg.display_only.unwrap_or(false);
        let signing = !msg.address_n.is_empty();
        let shown = String::from_utf8_lossy(plaintext).into_owned();
        let title = if signing { "Encrypt and Sign Message" } else { "Encrypt Message" };
        self.confirm(ButtonRequestType::ProtectCall, title, &shown)?;

        // Inner layout: flags, message, then the optional signer proof.
        let mut inner = Vec::with_capacity(plaintext.len() + 128);
        let mut flags = 0u8;
        if display_only {
            flags |= 0x01;
        }
        if signing {
            flags |= 0x02;
        }
        inner.push(flags);
        inner.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
        inner.extend_from_slice(plaintext);
        if signing {
            self.require_pin(now)?;
            let coin = coins::by_name(msg.coin_name.as_deref().unwrap_or("Bitcoin"))
                .ok_or_else(|| Interrupt::other("Invalid coin name"))?;
            let mut node = self.root_clone()?;
            if node.derive_path(&msg.address_n).is_err() {
                return Err(Interrupt::other("Failed to derive private key"));
            }
            let signer_address = address::p2pkh(&node.public_key, coin.address_type);
            let signature = message_sign::bitcoin_sign(node.private_key(), plaintext)
                .map_err(|_| Interrupt::other("Error signing message"))?;
            inner.push(signer_address.len() as u8);
            inner.extend_from_slice(signer_address.as_bytes());
            inner.extend_from_slice(&signature);
        }

        let mut ephemeral = [0u8; 32];
        self.entropy.fill(&mut ephemeral);
        let (nonce, ciphertext, hmac) = cipher::ecies_encrypt(pubkey, &inner, &ephemeral)
            .map_err(|_| Interrupt::failed(FailureCode::ActionCancelled, "Error encrypting message"))?;

        self.queue(Message::EncryptedMessage(EncryptedMessage {
            nonce: Some(nonce),
            message: Some(ciphertext),
            hmac: Some(hmac),
        }));
        self.go_home();
        Ok(())
    }

    fn msg_decrypt_message(&mut self, msg: &DecryptMessage, now: I) -> Result<(), Interrupt> {
        let Some(nonce) = &msg.nonce else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No nonce provided"));
        };
        let Some(ciphertext) = &msg.message else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No message provided"));
        };
        let Some(hmac) = &msg.hmac else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No message hmac provided"));
        };
        self.require_pin(now)?;

        let mut node = self.root_clone()?;
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }
        let inner = cipher::ecies_decrypt(node.private_key(), nonce, ciphertext, hmac)
            .map_err(|_| Interrupt::failed(FailureCode::ActionCancelled, "Error decrypting message"))?;

        // Parse the inner layout written by msg_encrypt_message.
        if inner.len() < 5 {
            return Err(Interrupt::other("Malformed encrypted payload"));
        }
        let flags = inner[0];
        let msg_len = u32::from_le_bytes([inner[1], inner[2], inner[3], inner[4]]) as usize;
        let body_end = 5 + msg_len;
        if inner.len() < body_end {
            return Err(Interrupt::other("Malformed encrypted payload"));
        }
        let plaintext = &inner[5..body_end];
        let display_only = flags & 0x01 != 0;
        let signed = flags & 0x02 != 0;

        let signer_address = if signed {
            let rest = &inner[body_end..];
            if rest.is_empty() {
                return Err(Interrupt::other("Malformed encrypted payload"));
            }
            let addr_len = rest[0] as usize;
            if rest.len() < 1 + addr_len + 65 {
                return Err(Interrupt::other("Malformed encrypted payload"));
            }
            let addr = String::from_utf8_lossy(&rest[1..1 + addr_len]).into_owned();
            let signature = &rest[1 + addr_len..1 + addr_len + 65];
            let coin = coins::by_name("Bitcoin").ok_or_else(|| Interrupt::other("No coin"))?;
            message_sign::bitcoin_verify(coin.address_type, &addr, plaintext, signature)
                .map_err(|_| {
                    Interrupt::failed(FailureCode::InvalidSignature, "Invalid inner signature")
                })?;
            Some(addr)
        } else {
            None
        };

        let shown = String::from_utf8_lossy(plaintext).into_owned();
        self.review(ButtonRequestType::Other, "Decrypted Message", &shown)?;

        let reply = if display_only {
            DecryptedMessage { message: None, address: None }
        } else {
            DecryptedMessage { message: Some(plaintext.to_vec()), address: signer_address }
        };
        self.queue(Message::DecryptedMessage(reply));
        self.go_home();
        Ok(())
    }

    fn msg_recovery_device(&mut self, msg: &RecoveryDevice) -> Result<(), Interrupt> {
        if self.storage_ref()?.record().is_initialized() {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Device is already initialized. Use Wipe first.",
            ));
        }
        self.confirm(
            ButtonRequestType::ProtectCall,
            "Recover Wallet",
            "Do you want to recover a wallet from its recovery sentence?",
        )?;

        let new_pin =
            if msg.pin_protection.unwrap_or(false) { Some(self.request_new_pin()?) } else { None };

        let settings = RecoverySettings {
            passphrase_protection: msg.passphrase_protection.unwrap_or(false),
            language: msg.language.clone(),
            label: msg.label.clone(),
            enforce_wordlist: msg.enforce_wordlist.unwrap_or(false),
            pin: new_pin,
        };

        if msg.use_character_cipher.unwrap_or(false) {
            let recovery = CipherRecovery::new(settings, &mut self.entropy);
            self.push_display(Screen::Cipher {
                cipher: recovery.cipher_string(),
                word_hint: recovery.word_hint(),
            });
            self.queue(Message::CharacterRequest(recovery.request()));
            self.recovery = Some(RecoverySession::Cipher(recovery));
        } else {
            let word_count = msg.word_count.unwrap_or(12);
            let recovery = WordRecovery::new(word_count, settings)?;
            self.recovery = Some(RecoverySession::Word(recovery));
            self.queue(Message::WordRequest);
        }
        Ok(())
    }

    fn msg_word_ack(&mut self, msg: &WordAck) -> Result<(), Interrupt> {
        let Some(RecoverySession::Word(mut recovery)) = self.recovery.take() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Not in Recovery mode",
            ));
        };
        match recovery.word(&msg.word) {
            Ok(Some(sentence)) => self.finish_recovery(&sentence, recovery.into_settings()),
            Ok(None) => {
                self.recovery = Some(RecoverySession::Word(recovery));
                self.queue(Message::WordRequest);
                Ok(())
            }
            Err(interrupt) => Err(interrupt),
        }
    }

    fn msg_character_ack(&mut self, character: &str) -> Result<(), Interrupt> {
        let Some(RecoverySession::Cipher(mut recovery)) = self.recovery.take() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Not in Recovery mode",
            ));
        };
        recovery.character(character, &mut self.entropy)?;
        self.push_display(Screen::Cipher {
            cipher: recovery.cipher_string(),
            word_hint: recovery.word_hint(),
        });
        self.queue(Message::CharacterRequest(recovery.request()));
        self.recovery = Some(RecoverySession::Cipher(recovery));
        Ok(())
    }

    fn msg_character_delete(&mut self) -> Result<(), Interrupt> {
        let Some(RecoverySession::Cipher(mut recovery)) = self.recovery.take() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Not in Recovery mode",
            ));
        };
        recovery.delete(&mut self.entropy);
        self.push_display(Screen::Cipher {
            cipher: recovery.cipher_string(),
            word_hint: recovery.word_hint(),
        });
        self.queue(Message::CharacterRequest(recovery.request()));
        self.recovery = Some(RecoverySession::Cipher(recovery));
        Ok(())
    }

    fn msg_character_final(&mut self) -> Result<(), Interrupt> {
        let Some(RecoverySession::Cipher(recovery)) = self.recovery.take() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Not in Recovery mode",
            ));
        };
        let (sentence, settings) = recovery.finalize()?;
        self.finish_recovery(&sentence, settings)
    }

    fn finish_recovery(
        &mut self,
        sentence: &str,
        settings: RecoverySettings,
    ) -> Result<(), Interrupt> {
        self.go_home();
        let storage = self.storage_mut_checked()?;
        let record = storage.record_mut();
        record.set_mnemonic(sentence);
        record.set_imported(false);
        record.set_passphrase_protection(settings.passphrase_protection);
        if let Some(language) = &settings.language {
            record.set_language(language);
        }
        if let Some(label) = &settings.label {
            record.set_label(label);
        }
        if let Some(pin) = &settings.pin {
            record.set_pin(Some(pin));
        }
        self.session.clear();
        self.commit_storage()?;
        self.send_success("Device recovered");
        Ok(())
    }

    fn msg_ethereum_get_address(
        &mut self,
        msg: &EthereumGetAddress,
        now: I,
    ) -> Result<(), Interrupt> {
        self.require_pin(now)?;
        let mut node = self.root_clone()?;
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }
        let raw = address::ethereum_pubkeyhash(&node.public_key)
            .map_err(|_| Interrupt::other("Failed to derive address"))?;

        if msg.show_display.unwrap_or(false) {
            self.confirm(ButtonRequestType::Address, "Confirm Address", &address::eip55(&raw))?;
        }
        self.queue(Message::EthereumAddress(EthereumAddress { address: raw.to_vec() }));
        self.go_home();
        Ok(())
    }

    fn msg_ethereum_sign_tx(&mut self, msg: &EthereumSignTx, now: I) -> Result<(), Interrupt> {
        self.require_pin(now)?;
        let root = self.root_clone()?;
        let exchange_enabled = self.storage_ref()?.record().policy_enabled("ShapeShift");

        let (signer, reply) = EthereumSigner::start(self, msg, &root, exchange_enabled)?;
        if let Some(signer) = signer {
            self.signer = Some(ActiveSigner::Ethereum(Box::new(signer)));
        } else {
            self.go_home();
        }
        self.queue(reply);
        Ok(())
    }

    fn msg_ethereum_tx_ack(&mut self, msg: &EthereumTxAck) -> Result<(), Interrupt> {
        let Some(ActiveSigner::Ethereum(mut signer)) = self.signer.take() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Ethereum signing not in progress",
            ));
        };
        match signer.data_ack(&msg.data_chunk) {
            Ok((done, reply)) => {
                if !done {
                    self.signer = Some(ActiveSigner::Ethereum(signer));
                } else {
                    self.go_home();
                }
                self.queue(reply);
                Ok(())
            }
            Err(failed) => Err(failed),
        }
    }

    fn msg_ethereum_sign_message(
        &mut self,
        msg: &EthereumSignMessage,
        now: I,
    ) -> Result<(), Interrupt> {
        let shown = String::from_utf8_lossy(&msg.message).into_owned();
        self.confirm(ButtonRequestType::ProtectCall, "Sign Message", &shown)?;
        self.require_pin(now)?;

        let mut node = self.root_clone()?;
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }
        let raw = address::ethereum_pubkeyhash(&node.public_key)
            .map_err(|_| Interrupt::other("Failed to derive address"))?;
        let signature = message_sign::ethereum_sign(node.private_key(), &msg.message)
            .map_err(|_| Interrupt::other("Error signing message"))?;

        self.queue(Message::EthereumMessageSignature(EthereumMessageSignature {
            address: Some(raw.to_vec()),
            signature: Some(signature.to_vec()),
        }));
        self.go_home();
        Ok(())
    }

    fn msg_ethereum_verify_message(
        &mut self,
        msg: &EthereumVerifyMessage,
    ) -> Result<(), Interrupt> {
        let Some(claimed) = msg.address.as_deref() else {
            return Err(Interrupt::other("No address provided"));
        };
        let Some(message) = &msg.message else {
            return Err(Interrupt::other("No message provided"));
        };
        let Some(signature) = &msg.signature else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No signature provided"));
        };
        let raw: [u8; 20] = claimed
            .try_into()
            .map_err(|_| Interrupt::failed(FailureCode::SyntaxError, "Invalid address"))?;

        if message_sign::ethereum_verify(&raw, message, signature).is_err() {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "Invalid signature"));
        }
        let shown = String::from_utf8_lossy(message).into_owned();
        self.review(ButtonRequestType::Other, "Message Verified", &shown)?;
        self.send_success("Message verified");
        self.go_home();
        Ok(())
    }

    fn msg_cosmos_sign_tx(&mut self, msg: &CosmosSignTx, now: I) -> Result<(), Interrupt> {
        self.require_pin(now)?;
        let root = self.root_clone()?;
        let (signer, reply) = CosmosSigner::start(self, msg, &root)?;
        self.signer = Some(ActiveSigner::Cosmos(Box::new(signer)));
        self.queue(reply);
        Ok(())
    }

    fn msg_cosmos_tx_ack(&mut self, msg: &CosmosTxAck) -> Result<(), Interrupt> {
        let Some(ActiveSigner::Cosmos(mut signer)) = self.signer.take() else {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Cosmos signing not in progress",
            ));
        };
        let Some(send) = &msg.send else {
            self.signer = Some(ActiveSigner::Cosmos(signer));
            return Err(Interrupt::failed(FailureCode::SyntaxError, "No message provided"));
        };
        match signer.msg_ack(self, send) {
            Ok((done, reply)) => {
                if !done {
                    self.signer = Some(ActiveSigner::Cosmos(signer));
                } else {
                    self.go_home();
                }
                self.queue(reply);
                Ok(())
            }
            Err(Interrupt::Pending) => {
                self.signer = Some(ActiveSigner::Cosmos(signer));
                Err(Interrupt::Pending)
            }
            Err(failed) => Err(failed),
        }
    }
}
