//! Solidity interfaces and EIP-712 structs for the EVM schemes.

use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

sol! {
    /// ERC-3009 token surface, plus the ERC-20 reads the facilitator needs.
    ///
    /// `transferWithAuthorization` is declared in both its bytes-signature
    /// form (contract wallets, EOAs alike) and its split `(v, r, s)` form
    /// (legacy deployments that predate the bytes entrypoint).
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IEip3009 {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature
        ) external;

        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;

        function balanceOf(address account) external view returns (uint256);
        function name() external view returns (string);
        function version() external view returns (string);
    }

    /// EIP-2612 token surface for the permit scheme.
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IErc20Permit {
        function permit(
            address owner,
            address spender,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;

        function transferFrom(address from, address to, uint256 value) external returns (bool);
        function nonces(address owner) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }

    /// ERC-1271 validation surface for deployed smart wallets.
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IErc1271 {
        function isValidSignature(bytes32 hash, bytes signature) external view returns (bytes4);
    }

    /// EIP-712 message behind ERC-3009 `transferWithAuthorization`.
    #[allow(missing_docs)]
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }

    /// EIP-712 message behind EIP-2612 `permit`.
    #[allow(missing_docs)]
    #[derive(Serialize, Deserialize)]
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }
}

/// ERC-1271 magic return value for a valid signature.
pub const ERC1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

/// ERC-6492 wrapper suffix: `0x6492` repeated over 32 bytes.
pub const ERC6492_MAGIC_SUFFIX: [u8; 32] = [
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64,
    0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
    0x64, 0x92,
];

/// Whether a signature carries the ERC-6492 wrapper suffix.
pub fn is_erc6492_wrapped(signature: &[u8]) -> bool {
    signature.len() >= 32 && signature[signature.len() - 32..] == ERC6492_MAGIC_SUFFIX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc6492_detection() {
        let mut wrapped = vec![0u8; 100];
        wrapped.extend_from_slice(&ERC6492_MAGIC_SUFFIX);
        assert!(is_erc6492_wrapped(&wrapped));

        let plain = vec![0u8; 65];
        assert!(!is_erc6492_wrapped(&plain));
    }
}
