//! Event definitions for the contracts the decoder recognizes.
//!
//! Only events are decoded, so the definitions are inlined rather than
//! loaded from full contract ABIs.

pub mod erc20 {
    alloy::sol! {
        #[derive(Debug)]
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

pub mod ctf {
    alloy::sol! {
        #[derive(Debug)]
        event TransferSingle(
            address indexed operator,
            address indexed from,
            address indexed to,
            uint256 id,
            uint256 value
        );

        #[derive(Debug)]
        event TransferBatch(
            address indexed operator,
            address indexed from,
            address indexed to,
            uint256[] ids,
            uint256[] values
        );
    }
}

pub mod exchange {
    alloy::sol! {
        #[derive(Debug)]
        event OrderFilled(
            bytes32 indexed orderHash,
            address indexed maker,
            address indexed taker,
            uint256 makerAssetId,
            uint256 takerAssetId,
            uint256 makerAmountFilled,
            uint256 takerAmountFilled,
            uint256 fee
        );
    }
}
