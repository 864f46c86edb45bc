//! Counterfactual sender address of an account that is not deployed yet.
//!
//! The entry point only reveals the address by reverting from `getSenderAddress`. A tiny
//! helper contract calls it from its constructor, catches the revert and returns the 20-byte
//! address, so a single `eth_call` with no `to` (a simulated deployment) yields the answer.
//! Nothing is ever written on chain.

use crate::encoding::parse_bytes;
use crate::error::{Error, Result};
use ethers::abi::{self, Token};
use ethers::providers::{Middleware, MiddlewareError};
use ethers::types::{Address, Bytes, TransactionRequest};

/// Creation code of the helper; constructor is `(address entryPoint, bytes initCode)`.
const HELPER_BYTECODE: &str = concat!(
    "6080604052604051610302380380610302833981016040819052610022916101de565b600080836001600160a01b0316",
    "639b249f6960e01b8460405160240161004891906102b2565b60408051601f1981840301815291815260208201805160",
    "01600160e01b03166001600160e01b031990941693909317909252905161008691906102e5565b600060405180830381",
    "6000865af19150503d80600081146100c3576040519150601f19603f3d011682016040523d82523d6000602084013e61",
    "00c8565b606091505b5091509150600082610148576004825111156100ef5760248201519050806000526014600cf35b",
    "60405162461bcd60e51b8152602060048201526024808201527f67657453656e64657241646472657373206661696c65",
    "6420776974686f7574206044820152636461746160e01b60648201526084015b60405180910390fd5b60405162461bcd",
    "60e51b815260206004820152602b60248201527f67657453656e6465724164647265737320646964206e6f7420726576",
    "6572742060448201526a185cc8195e1c1958dd195960aa1b606482015260840161013f565b634e487b7160e01b600052",
    "604160045260246000fd5b60005b838110156101d55781810151838201526020016101bd565b50506000910152565b60",
    "0080604083850312156101f157600080fd5b82516001600160a01b038116811461020857600080fd5b60208401519092",
    "506001600160401b0381111561022457600080fd5b8301601f8101851361023557600080fd5b80516001600160401b03",
    "81111561024e5761024e6101a4565b604051601f8201601f19908116603f011681016001600160401b03811182821017",
    "1561027c5761027c6101a4565b60405281815282820160200187101561029457600080fd5b6102a58260208301602086",
    "016101ba565b8093505050509250929050565b60208152600082518060208401526102d18160408501602087016101ba",
    "565b601f01601f19169190910160400192915050565b600082516102f78184602087016101ba565b9190910192915050",
    "56fe",
);

/// Helper creation code followed by its ABI-encoded constructor arguments.
pub fn deploy_data(entry_point: Address, init_code: &[u8]) -> Result<Bytes> {
    let mut data = parse_bytes(HELPER_BYTECODE)?.to_vec();
    data.extend(abi::encode(&[
        Token::Address(entry_point),
        Token::Bytes(init_code.to_vec()),
    ]));
    Ok(Bytes::from(data))
}

/// Reads the sender out of the simulated deployment's return data.
///
/// The helper returns the bare 20 bytes; a left-padded 32-byte word is accepted as well.
pub fn parse_sender_result(entry_point: Address, data: &[u8]) -> Result<Address> {
    match data.len() {
        20 => Ok(Address::from_slice(data)),
        32 if data[..12].iter().all(|b| *b == 0) => Ok(Address::from_slice(&data[12..])),
        n => Err(Error::InvalidEntryPoint {
            entry_point,
            reason: format!("getSenderAddress simulation returned {n} bytes, expected an address"),
        }),
    }
}

/// Resolves the address `init_code` would deploy to through `entry_point`.
///
/// A reverting simulation means the entry point never produced `SenderAddressResult` and
/// fails with [`Error::InvalidEntryPoint`]; node connectivity problems are
/// [`Error::Transport`].
pub async fn resolve_sender_address<M: Middleware>(
    client: &M,
    entry_point: Address,
    init_code: &[u8],
) -> Result<Address> {
    if init_code.is_empty() {
        return Err(Error::Encoding(
            "init code (factory ‖ factoryData) is required to resolve a sender".to_string(),
        ));
    }

    let tx = TransactionRequest::new().data(deploy_data(entry_point, init_code)?);
    let data = client.call(&tx.into(), None).await.map_err(|e| {
        match e.as_error_response() {
            Some(rpc_err) => Error::InvalidEntryPoint {
                entry_point,
                reason: rpc_err.message.clone(),
            },
            None => Error::Transport(format!("eth_call failed: {e}")),
        }
    })?;

    let sender = parse_sender_result(entry_point, &data)?;
    tracing::info!(
        entry_point = ?entry_point,
        sender = ?sender,
        "resolved counterfactual sender"
    );
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::init_code;
    use ethers::providers::Provider;

    fn entry_point() -> Address {
        crate::encoding::parse_address("0x0000000071727De22E5E9d8BAf0edAc6f37da032").unwrap()
    }

    fn factory_init_code() -> Bytes {
        init_code(Some(Address::repeat_byte(0x22)), &[0x5f, 0xbf, 0xb9, 0xcf])
    }

    #[test]
    fn deploy_data_appends_constructor_args() {
        let code = parse_bytes(HELPER_BYTECODE).unwrap();
        assert_eq!(code.len(), 770);

        let data = deploy_data(entry_point(), &factory_init_code()).unwrap();
        assert_eq!(&data[..code.len()], code.as_ref());

        let args = abi::decode(
            &[abi::ParamType::Address, abi::ParamType::Bytes],
            &data[code.len()..],
        )
        .unwrap();
        assert_eq!(args[0], Token::Address(entry_point()));
        assert_eq!(args[1], Token::Bytes(factory_init_code().to_vec()));
    }

    #[test]
    fn return_data_shapes() {
        let addr = Address::repeat_byte(0x33);
        assert_eq!(parse_sender_result(entry_point(), addr.as_bytes()).unwrap(), addr);

        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_bytes());
        assert_eq!(parse_sender_result(entry_point(), &word).unwrap(), addr);

        let mut dirty = word;
        dirty[0] = 1;
        assert!(matches!(
            parse_sender_result(entry_point(), &dirty),
            Err(Error::InvalidEntryPoint { .. })
        ));
    }

    #[tokio::test]
    async fn resolves_from_simulated_deployment() {
        let (provider, mock) = Provider::mocked();
        let sender = Address::repeat_byte(0x44);
        mock.push::<Bytes, _>(Bytes::from(sender.as_bytes().to_vec())).unwrap();

        let got = resolve_sender_address(&provider, entry_point(), &factory_init_code())
            .await
            .unwrap();
        assert_eq!(got, sender);
    }

    #[tokio::test]
    async fn unexpected_return_is_an_invalid_entry_point() {
        let (provider, mock) = Provider::mocked();
        mock.push::<Bytes, _>(Bytes::from(vec![1, 2, 3, 4, 5])).unwrap();

        let err = resolve_sender_address(&provider, entry_point(), &factory_init_code())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntryPoint { entry_point: ep, .. } if ep == entry_point()));
    }

    #[tokio::test]
    async fn node_failure_is_a_transport_error() {
        // No scripted response: the mock transport itself fails.
        let (provider, _mock) = Provider::mocked();
        let err = resolve_sender_address(&provider, entry_point(), &factory_init_code())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn empty_init_code_is_rejected_before_any_call() {
        let (provider, _mock) = Provider::mocked();
        let err = resolve_sender_address(&provider, entry_point(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }
}
