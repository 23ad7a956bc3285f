//! Script templates, signature hashing, and the script interpreter.
//!
//! The interpreter covers the opcodes reachable from the recognized standard
//! templates (pay-to-pubkey, pay-to-pubkey-hash, pay-to-script-hash,
//! multisig, null-data) plus pay-to-script-hash redemption. Non-standard
//! scripts that stay within this opcode set evaluate normally; anything else
//! fails with [`ScriptError::BadOpcode`].

use lazy_static::lazy_static;
use secp256k1::{Message, PublicKey, Secp256k1, Signature, VerifyOnly};
use thiserror::Error;

use crate::serialization::sha256d::{hash160, hash256};
use crate::serialization::varint::{read_varint, write_varint};
use crate::transaction::Transaction;
use crate::transparent::Script;
use crate::{ChainSerialize, SerializationError};

lazy_static! {
    static ref SECP: Secp256k1<VerifyOnly> = Secp256k1::verification_only();
}

// Push opcodes.
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;

// Control and stack opcodes.
pub const OP_NOP: u8 = 0x61;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;

// Comparison and crypto opcodes.
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_RIPEMD160: u8 = 0xa6;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CODESEPARATOR: u8 = 0xab;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Signature hash types, carried in the final byte of each signature.
pub const SIGHASH_ALL: u8 = 1;
pub const SIGHASH_NONE: u8 = 2;
pub const SIGHASH_SINGLE: u8 = 3;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Consensus limits on script execution.
const MAX_SCRIPT_SIZE: usize = 10_000;
const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
const MAX_OPS_PER_SCRIPT: usize = 201;
const MAX_STACK_SIZE: usize = 1_000;
const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;

/// The most data bytes a standard null-data output may carry.
const MAX_NULL_DATA_SIZE: usize = 80;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Script evaluated without error but finished with a false top element
    #[error("script evaluated to false")]
    EvalFalse,
    /// An opcode outside the supported set, or a disabled opcode
    #[error("unsupported or disabled opcode {0:#04x}")]
    BadOpcode(u8),
    #[error("push exceeds maximum element size")]
    PushSize,
    #[error("push extends past end of script")]
    BadPush,
    #[error("operation count limit exceeded")]
    OpCount,
    #[error("stack size limit exceeded")]
    StackSize,
    #[error("script size limit exceeded")]
    ScriptSize,
    #[error("operation on an empty or too-short stack")]
    InvalidStackOperation,
    #[error("OP_VERIFY failed")]
    Verify,
    #[error("OP_RETURN encountered")]
    OpReturn,
    #[error("signature encoding is not canonical")]
    SignatureEncoding,
    #[error("public key encoding is not canonical")]
    PubKeyEncoding,
    #[error("multisig key or signature count out of range")]
    SigCount,
    #[error("scriptSig is not push-only")]
    SigPushOnly,
    #[error("number encoding too large")]
    NumberOverflow,
}

/// The recognized locking-script templates.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TemplateKind {
    /// Unknown script type; consensus-valid but non-standard.
    Nonstandard,
    /// Pay directly to a serialized public key.
    PubKey,
    /// Pay to the hash160 of a public key.
    PubKeyHash,
    /// Pay to the hash160 of a redeem script.
    ScriptHash,
    /// Bare m-of-n multisignature.
    Multisig,
    /// Provably unspendable data carrier.
    NullData,
}

/// Where an output pays to, for the templates that name a destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Destination {
    /// The script does not name a destination (bare multisig, null-data,
    /// non-standard scripts).
    None,
    /// A pay-to-pubkey or pay-to-pubkey-hash destination.
    PubKeyHash([u8; 20]),
    /// A pay-to-script-hash destination.
    ScriptHash([u8; 20]),
}

/// One parsed script operation: the opcode and, for pushes, its data.
type Op = (u8, Option<Vec<u8>>);

/// Parse a script into operations, validating push lengths.
pub fn parse_ops(script: &[u8]) -> Result<Vec<Op>, ScriptError> {
    let mut ops = Vec::new();
    let mut i = 0;
    while i < script.len() {
        let opcode = script[i];
        i += 1;
        let data_len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                let len = *script.get(i).ok_or(ScriptError::BadPush)? as usize;
                i += 1;
                len
            }
            OP_PUSHDATA2 => {
                let bytes = script.get(i..i + 2).ok_or(ScriptError::BadPush)?;
                i += 2;
                u16::from_le_bytes([bytes[0], bytes[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let bytes = script.get(i..i + 4).ok_or(ScriptError::BadPush)?;
                i += 4;
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            _ => {
                ops.push((opcode, None));
                continue;
            }
        };
        let data = script.get(i..i + data_len).ok_or(ScriptError::BadPush)?;
        i += data_len;
        ops.push((opcode, Some(data.to_vec())));
    }
    Ok(ops)
}

fn is_small_int(op: &Op) -> Option<u8> {
    match op {
        (OP_0, None) => Some(0),
        (opcode, None) if (OP_1..=OP_16).contains(opcode) => Some(opcode - OP_1 + 1),
        _ => None,
    }
}

fn is_pubkey_push(op: &Op) -> Option<&Vec<u8>> {
    match op {
        (_, Some(data)) if data.len() == 33 || data.len() == 65 => Some(data),
        _ => None,
    }
}

/// Classify a locking script against the standard templates, returning the
/// template's solution data (hashes, keys, counts).
pub fn solver(script_pubkey: &Script) -> Option<(TemplateKind, Vec<Vec<u8>>)> {
    let ops = parse_ops(script_pubkey.as_bytes()).ok()?;

    // Pay-to-script-hash is an exact byte pattern, matched first.
    if let [(OP_HASH160, None), (0x14, Some(hash)), (OP_EQUAL, None)] = ops.as_slice() {
        return Some((TemplateKind::ScriptHash, vec![hash.clone()]));
    }

    // Null-data: OP_RETURN with at most one small push.
    if let Some((OP_RETURN, None)) = ops.first() {
        return match ops.len() {
            1 => Some((TemplateKind::NullData, vec![])),
            2 => match &ops[1] {
                (_, Some(data)) if data.len() <= MAX_NULL_DATA_SIZE => {
                    Some((TemplateKind::NullData, vec![data.clone()]))
                }
                _ => None,
            },
            _ => None,
        };
    }

    // Pay-to-pubkey-hash.
    if let [(OP_DUP, None), (OP_HASH160, None), (0x14, Some(hash)), (OP_EQUALVERIFY, None), (OP_CHECKSIG, None)] =
        ops.as_slice()
    {
        return Some((TemplateKind::PubKeyHash, vec![hash.clone()]));
    }

    // Pay-to-pubkey.
    if let [pubkey_op, (OP_CHECKSIG, None)] = ops.as_slice() {
        if let Some(pubkey) = is_pubkey_push(pubkey_op) {
            return Some((TemplateKind::PubKey, vec![pubkey.clone()]));
        }
    }

    // Bare multisig: OP_m <pubkey...> OP_n OP_CHECKMULTISIG.
    if ops.len() >= 4 && ops.last() == Some(&(OP_CHECKMULTISIG, None)) {
        let required = is_small_int(&ops[0])?;
        let total = is_small_int(&ops[ops.len() - 2])?;
        let keys = &ops[1..ops.len() - 2];
        if required == 0 || total as usize != keys.len() || required > total {
            return None;
        }
        let mut solutions = vec![vec![required]];
        for key in keys {
            solutions.push(is_pubkey_push(key)?.clone());
        }
        solutions.push(vec![total]);
        return Some((TemplateKind::Multisig, solutions));
    }

    None
}

/// The destination an output pays to, if its template names one.
pub fn extract_destination(script_pubkey: &Script) -> Destination {
    match solver(script_pubkey) {
        Some((TemplateKind::PubKeyHash, solutions)) => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&solutions[0]);
            Destination::PubKeyHash(hash)
        }
        Some((TemplateKind::PubKey, solutions)) => {
            Destination::PubKeyHash(hash160(&solutions[0]))
        }
        Some((TemplateKind::ScriptHash, solutions)) => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&solutions[0]);
            Destination::ScriptHash(hash)
        }
        _ => Destination::None,
    }
}

/// Whether a locking script is standard for relay purposes.
///
/// Standardness does not affect consensus validity; it only gates mempool
/// admission. Bare multisig is standard up to 3 keys.
pub fn is_standard(script_pubkey: &Script) -> bool {
    match solver(script_pubkey) {
        Some((TemplateKind::Multisig, solutions)) => {
            let total = solutions.last().map(|s| s[0]).unwrap_or(0);
            (1..=3).contains(&total)
        }
        Some(_) => true,
        None => false,
    }
}

/// Whether `script_sig` pushes exactly the data its locking-script template
/// expects, and nothing else.
pub fn is_input_standard(script_sig: &Script, prev_script: &Script) -> bool {
    let ops = match parse_ops(script_sig.as_bytes()) {
        Ok(ops) => ops,
        Err(_) => return false,
    };
    if !ops.iter().all(|op| op.0 <= OP_16) {
        return false;
    }
    match solver(prev_script) {
        Some((TemplateKind::PubKey, _)) => ops.len() == 1,
        Some((TemplateKind::PubKeyHash, _)) => ops.len() == 2,
        Some((TemplateKind::Multisig, solutions)) => {
            // The extra element consumed by the multisig bug, plus one
            // signature per required key.
            ops.len() == solutions[0][0] as usize + 1
        }
        Some((TemplateKind::ScriptHash, _)) => match ops.last() {
            // The last push is the redeem script; it must itself be a
            // standard non-P2SH template.
            Some((_, Some(redeem))) => matches!(
                solver(&Script(redeem.clone())),
                Some((TemplateKind::PubKey, _))
                    | Some((TemplateKind::PubKeyHash, _))
                    | Some((TemplateKind::Multisig, _))
            ),
            _ => false,
        },
        Some((TemplateKind::NullData, _)) | Some((TemplateKind::Nonstandard, _)) | None => false,
    }
}

/// Count signature operations the legacy way: a conservative per-opcode sum.
///
/// With `accurate`, a CHECKMULTISIG directly preceded by a small integer
/// counts that many operations instead of the worst-case 20.
pub fn sig_op_count(script: &[u8], accurate: bool) -> usize {
    let ops = match parse_ops(script) {
        Ok(ops) => ops,
        // Sigops in an unparseable tail are unreachable.
        Err(_) => return 0,
    };
    let mut count = 0;
    let mut last: Option<&Op> = None;
    for op in &ops {
        match op.0 {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                count += match last.and_then(is_small_int) {
                    Some(n) if accurate && n >= 1 => n as usize,
                    _ => MAX_PUBKEYS_PER_MULTISIG as usize,
                };
            }
            _ => {}
        }
        last = Some(op);
    }
    count
}

/// Count the signature operations hidden behind a pay-to-script-hash input:
/// the accurate count over the redeem script carried in `script_sig`.
pub fn p2sh_sig_op_count(script_sig: &Script, prev_script: &Script) -> usize {
    match solver(prev_script) {
        Some((TemplateKind::ScriptHash, _)) => {}
        _ => return 0,
    }
    let ops = match parse_ops(script_sig.as_bytes()) {
        Ok(ops) => ops,
        Err(_) => return 0,
    };
    if !ops.iter().all(|op| op.0 <= OP_16) {
        return 0;
    }
    match ops.last() {
        Some((_, Some(redeem))) => sig_op_count(redeem, true),
        _ => 0,
    }
}

/// A signature encoding check: strict DER with a known hash type byte.
pub fn is_canonical_signature(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    let hash_type = sig[sig.len() - 1] & !SIGHASH_ANYONECANPAY;
    if !(SIGHASH_ALL..=SIGHASH_SINGLE).contains(&hash_type) {
        return false;
    }
    let der = &sig[..sig.len() - 1];
    if der[0] != 0x30 || der[1] as usize != der.len() - 2 {
        return false;
    }
    // R element.
    if der[2] != 0x02 {
        return false;
    }
    let len_r = der[3] as usize;
    if len_r == 0 || 5 + len_r >= der.len() {
        return false;
    }
    let r = &der[4..4 + len_r];
    if r[0] & 0x80 != 0 || (len_r > 1 && r[0] == 0 && r[1] & 0x80 == 0) {
        return false;
    }
    // S element.
    if der[4 + len_r] != 0x02 {
        return false;
    }
    let len_s = der[5 + len_r] as usize;
    if len_s == 0 || 6 + len_r + len_s != der.len() {
        return false;
    }
    let s = &der[6 + len_r..];
    if s[0] & 0x80 != 0 || (len_s > 1 && s[0] == 0 && s[1] & 0x80 == 0) {
        return false;
    }
    true
}

/// A public key encoding check: compressed or uncompressed SEC form.
pub fn is_canonical_pubkey(pubkey: &[u8]) -> bool {
    match pubkey.len() {
        33 => pubkey[0] == 0x02 || pubkey[0] == 0x03,
        65 => pubkey[0] == 0x04,
        _ => false,
    }
}

/// Compute the signature hash for `script_code` over input `input_index`.
///
/// The per-input signature scripts are blanked, the executing script is
/// substituted for the signed input, outputs and sequences are masked per
/// the hash type, and the hash type itself is appended before hashing.
pub fn signature_hash(
    script_code: &Script,
    tx: &Transaction,
    input_index: usize,
    hash_type: u8,
) -> [u8; 32] {
    if input_index >= tx.inputs.len() {
        return one_hash();
    }

    let mut inputs = tx.inputs.clone();
    for input in inputs.iter_mut() {
        input.script_sig = Script(Vec::new());
    }
    // Strip code separators from the substituted script code.
    let code: Vec<u8> = match parse_ops(script_code.as_bytes()) {
        Ok(ops) => {
            let mut out = Vec::with_capacity(script_code.len());
            for (opcode, data) in ops {
                if opcode == OP_CODESEPARATOR {
                    continue;
                }
                out.push(opcode);
                match opcode {
                    OP_PUSHDATA1 => out.push(data.as_ref().unwrap().len() as u8),
                    OP_PUSHDATA2 => {
                        out.extend_from_slice(
                            &(data.as_ref().unwrap().len() as u16).to_le_bytes(),
                        );
                    }
                    OP_PUSHDATA4 => {
                        out.extend_from_slice(
                            &(data.as_ref().unwrap().len() as u32).to_le_bytes(),
                        );
                    }
                    _ => {}
                }
                if let Some(data) = data {
                    out.extend_from_slice(&data);
                }
            }
            out
        }
        Err(_) => script_code.0.clone(),
    };
    inputs[input_index].script_sig = Script(code);

    let mut outputs = tx.outputs.clone();
    match hash_type & 0x1f {
        SIGHASH_NONE => {
            outputs.clear();
            for (index, input) in inputs.iter_mut().enumerate() {
                if index != input_index {
                    input.sequence = 0;
                }
            }
        }
        SIGHASH_SINGLE => {
            if input_index >= outputs.len() {
                return one_hash();
            }
            outputs.truncate(input_index + 1);
            for output in outputs.iter_mut().take(input_index) {
                *output = crate::transparent::Output::null();
            }
            for (index, input) in inputs.iter_mut().enumerate() {
                if index != input_index {
                    input.sequence = 0;
                }
            }
        }
        _ => {}
    }
    if hash_type & SIGHASH_ANYONECANPAY != 0 {
        inputs = vec![inputs[input_index].clone()];
    }

    let masked = Transaction::new(tx.version, tx.time, inputs, outputs, tx.lock_time);
    let mut data = masked
        .chain_serialize_to_vec()
        .expect("serialization into a vec is infallible");
    data.extend_from_slice(&(hash_type as u32).to_le_bytes());
    hash256(&data)
}

/// The hash-of-one marker returned for out-of-range signature hashes.
fn one_hash() -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[0] = 1;
    hash
}

/// Verify a bare DER signature by `pubkey` over a 32-byte message hash.
///
/// Used for proof-of-stake block signatures, which sign the block hash
/// directly rather than a transaction sighash.
pub fn verify_hash_signature(hash: &[u8; 32], sig: &[u8], pubkey: &[u8]) -> bool {
    let message = Message::from_slice(hash).expect("32 bytes is a valid message length");
    let signature = match Signature::from_der(sig) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    let pubkey = match PublicKey::from_slice(pubkey) {
        Ok(pubkey) => pubkey,
        Err(_) => return false,
    };
    SECP.verify(&message, &signature, &pubkey).is_ok()
}

fn cast_to_bool(value: &[u8]) -> bool {
    for (index, &byte) in value.iter().enumerate() {
        if byte != 0 {
            // A trailing negative zero is false.
            return !(byte == 0x80 && index == value.len() - 1);
        }
    }
    false
}

/// Decode a minimally ranged script number (multisig counts).
fn decode_num(bytes: &[u8]) -> Result<i64, ScriptError> {
    if bytes.len() > 4 {
        return Err(ScriptError::NumberOverflow);
    }
    if bytes.is_empty() {
        return Ok(0);
    }
    let mut result: i64 = 0;
    for (index, &byte) in bytes.iter().enumerate() {
        result |= (byte as i64) << (8 * index);
    }
    if bytes.last().unwrap() & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        result = -(result & mask);
    }
    Ok(result)
}

fn check_signature(
    sig: &[u8],
    pubkey: &[u8],
    script_code: &Script,
    tx: &Transaction,
    input_index: usize,
) -> Result<bool, ScriptError> {
    if sig.is_empty() || pubkey.is_empty() {
        return Ok(false);
    }
    if !is_canonical_signature(sig) {
        return Err(ScriptError::SignatureEncoding);
    }
    if !is_canonical_pubkey(pubkey) {
        return Err(ScriptError::PubKeyEncoding);
    }
    let hash_type = sig[sig.len() - 1];
    let hash = signature_hash(script_code, tx, input_index, hash_type);

    let message = Message::from_slice(&hash).expect("32 bytes is a valid message length");
    let signature = match Signature::from_der(&sig[..sig.len() - 1]) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };
    let pubkey = match PublicKey::from_slice(pubkey) {
        Ok(pubkey) => pubkey,
        Err(_) => return Ok(false),
    };
    Ok(SECP.verify(&message, &signature, &pubkey).is_ok())
}

/// Evaluate `script` over `stack`, with `tx`/`input_index` providing the
/// signature-hash context. `script` itself is the signature-hash code.
pub fn eval_script(
    stack: &mut Vec<Vec<u8>>,
    script: &Script,
    tx: &Transaction,
    input_index: usize,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let ops = parse_ops(script.as_bytes())?;
    let mut op_count = 0usize;

    macro_rules! pop {
        () => {
            stack.pop().ok_or(ScriptError::InvalidStackOperation)?
        };
    }

    for (opcode, data) in ops {
        if let Some(data) = data {
            if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
            stack.push(data);
        } else {
            match opcode {
                OP_0 => stack.push(Vec::new()),
                OP_1NEGATE => stack.push(vec![0x81]),
                OP_1..=OP_16 => stack.push(vec![opcode - OP_1 + 1]),
                _ => {
                    op_count += 1;
                    if op_count > MAX_OPS_PER_SCRIPT {
                        return Err(ScriptError::OpCount);
                    }
                    match opcode {
                        OP_NOP | OP_CODESEPARATOR => {}
                        OP_RETURN => return Err(ScriptError::OpReturn),
                        OP_DUP => {
                            let top = stack
                                .last()
                                .ok_or(ScriptError::InvalidStackOperation)?
                                .clone();
                            stack.push(top);
                        }
                        OP_DROP => {
                            pop!();
                        }
                        OP_VERIFY => {
                            if !cast_to_bool(&pop!()) {
                                return Err(ScriptError::Verify);
                            }
                        }
                        OP_EQUAL | OP_EQUALVERIFY => {
                            let rhs = pop!();
                            let lhs = pop!();
                            let equal = lhs == rhs;
                            if opcode == OP_EQUALVERIFY {
                                if !equal {
                                    return Err(ScriptError::Verify);
                                }
                            } else {
                                stack.push(if equal { vec![1] } else { Vec::new() });
                            }
                        }
                        OP_RIPEMD160 => {
                            use ripemd160::{Digest, Ripemd160};
                            let top = pop!();
                            stack.push(Ripemd160::digest(&top).to_vec());
                        }
                        OP_SHA256 => {
                            use sha2::{Digest, Sha256};
                            let top = pop!();
                            stack.push(Sha256::digest(&top).to_vec());
                        }
                        OP_HASH160 => {
                            let top = pop!();
                            stack.push(hash160(&top).to_vec());
                        }
                        OP_HASH256 => {
                            let top = pop!();
                            stack.push(hash256(&top).to_vec());
                        }
                        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                            let pubkey = pop!();
                            let sig = pop!();
                            let ok = check_signature(&sig, &pubkey, script, tx, input_index)?;
                            if opcode == OP_CHECKSIGVERIFY {
                                if !ok {
                                    return Err(ScriptError::Verify);
                                }
                            } else {
                                stack.push(if ok { vec![1] } else { Vec::new() });
                            }
                        }
                        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                            let key_count = decode_num(&pop!())?;
                            if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&key_count) {
                                return Err(ScriptError::SigCount);
                            }
                            op_count += key_count as usize;
                            if op_count > MAX_OPS_PER_SCRIPT {
                                return Err(ScriptError::OpCount);
                            }
                            let mut keys = Vec::with_capacity(key_count as usize);
                            for _ in 0..key_count {
                                keys.push(pop!());
                            }
                            keys.reverse();

                            let sig_count = decode_num(&pop!())?;
                            if sig_count < 0 || sig_count > key_count {
                                return Err(ScriptError::SigCount);
                            }
                            let mut sigs = Vec::with_capacity(sig_count as usize);
                            for _ in 0..sig_count {
                                sigs.push(pop!());
                            }
                            sigs.reverse();

                            // The extra element consumed by the historical
                            // off-by-one in CHECKMULTISIG.
                            pop!();

                            let mut key_index = 0;
                            let mut ok = true;
                            for sig in &sigs {
                                loop {
                                    if key_index == keys.len() {
                                        ok = false;
                                        break;
                                    }
                                    let matched = check_signature(
                                        sig,
                                        &keys[key_index],
                                        script,
                                        tx,
                                        input_index,
                                    )?;
                                    key_index += 1;
                                    if matched {
                                        break;
                                    }
                                }
                                if !ok {
                                    break;
                                }
                            }

                            if opcode == OP_CHECKMULTISIGVERIFY {
                                if !ok {
                                    return Err(ScriptError::Verify);
                                }
                            } else {
                                stack.push(if ok { vec![1] } else { Vec::new() });
                            }
                        }
                        other => return Err(ScriptError::BadOpcode(other)),
                    }
                }
            }
        }
        if stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }
    Ok(())
}

/// Verify that `script_sig` satisfies `script_pubkey` for input
/// `input_index` of `tx`, honoring pay-to-script-hash redemption.
pub fn verify_script(
    script_sig: &Script,
    script_pubkey: &Script,
    tx: &Transaction,
    input_index: usize,
) -> Result<(), ScriptError> {
    let mut stack: Vec<Vec<u8>> = Vec::new();
    eval_script(&mut stack, script_sig, tx, input_index)?;
    let p2sh_stack = stack.clone();

    eval_script(&mut stack, script_pubkey, tx, input_index)?;
    match stack.last() {
        Some(top) if cast_to_bool(top) => {}
        _ => return Err(ScriptError::EvalFalse),
    }

    if let Some((TemplateKind::ScriptHash, _)) = solver(script_pubkey) {
        // Redemption re-runs the serialized script carried as the final
        // push of a push-only scriptSig.
        let ops = parse_ops(script_sig.as_bytes())?;
        if !ops.iter().all(|op| op.0 <= OP_16) {
            return Err(ScriptError::SigPushOnly);
        }
        let mut stack = p2sh_stack;
        let redeem = Script(stack.pop().ok_or(ScriptError::InvalidStackOperation)?);
        eval_script(&mut stack, &redeem, tx, input_index)?;
        match stack.last() {
            Some(top) if cast_to_bool(top) => {}
            _ => return Err(ScriptError::EvalFalse),
        }
    }
    Ok(())
}

/// Write `script` in the compressed coin-record form.
///
/// The recognized templates compress to 21 or 33 bytes under special size
/// codes 0..=5; anything else is written verbatim under `size + 6`.
pub fn write_compressed<W: std::io::Write>(
    script: &Script,
    mut writer: W,
) -> Result<(), std::io::Error> {
    if let Some(compressed) = compress_script(script) {
        return writer.write_all(&compressed);
    }
    write_varint(&mut writer, script.len() as u64 + 6)?;
    writer.write_all(script.as_bytes())
}

/// Read a script in the compressed coin-record form.
pub fn read_compressed<R: std::io::Read>(mut reader: R) -> Result<Script, SerializationError> {
    let code = read_varint(&mut reader)?;
    match code {
        0 | 1 => {
            let mut hash = [0u8; 20];
            reader.read_exact(&mut hash)?;
            let mut script = Vec::with_capacity(25);
            if code == 0 {
                script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
                script.extend_from_slice(&hash);
                script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            } else {
                script.push(OP_HASH160);
                script.push(0x14);
                script.extend_from_slice(&hash);
                script.push(OP_EQUAL);
            }
            Ok(Script(script))
        }
        2 | 3 => {
            let mut x = [0u8; 32];
            reader.read_exact(&mut x)?;
            let mut script = Vec::with_capacity(35);
            script.push(33);
            script.push(code as u8);
            script.extend_from_slice(&x);
            script.push(OP_CHECKSIG);
            Ok(Script(script))
        }
        4 | 5 => {
            let mut x = [0u8; 32];
            reader.read_exact(&mut x)?;
            let mut compressed = [0u8; 33];
            compressed[0] = code as u8 - 2;
            compressed[1..].copy_from_slice(&x);
            let pubkey = PublicKey::from_slice(&compressed)
                .map_err(|_| SerializationError::Parse("invalid compressed pubkey"))?;
            let mut script = Vec::with_capacity(67);
            script.push(65);
            script.extend_from_slice(&pubkey.serialize_uncompressed());
            script.push(OP_CHECKSIG);
            Ok(Script(script))
        }
        _ => {
            let len = code - 6;
            if len > MAX_SCRIPT_SIZE as u64 {
                return Err(SerializationError::OversizedPayload(len));
            }
            let mut bytes = vec![0u8; len as usize];
            reader.read_exact(&mut bytes)?;
            Ok(Script(bytes))
        }
    }
}

/// The special compressed form of a standard script, if it has one.
fn compress_script(script: &Script) -> Option<Vec<u8>> {
    match solver(script) {
        Some((TemplateKind::PubKeyHash, solutions)) => {
            let mut out = Vec::with_capacity(21);
            out.push(0x00);
            out.extend_from_slice(&solutions[0]);
            Some(out)
        }
        Some((TemplateKind::ScriptHash, solutions)) => {
            let mut out = Vec::with_capacity(21);
            out.push(0x01);
            out.extend_from_slice(&solutions[0]);
            Some(out)
        }
        Some((TemplateKind::PubKey, solutions)) => {
            let pubkey_bytes = &solutions[0];
            let pubkey = PublicKey::from_slice(pubkey_bytes).ok()?;
            let compressed = pubkey.serialize();
            let mut out = Vec::with_capacity(33);
            if pubkey_bytes.len() == 33 {
                out.push(pubkey_bytes[0]);
            } else {
                // Uncompressed keys store the parity under codes 4/5 and are
                // re-derived from the curve on decompression.
                out.push(compressed[0] + 2);
            }
            out.extend_from_slice(&compressed[1..]);
            Some(out)
        }
        _ => None,
    }
}
