//! Derive macros for the consensus serialization traits.
//!
//! `#[derive(ChainSerialize)]` writes every field in declaration order;
//! `#[derive(ChainDeserialize)]` reads them back in the same order. Both
//! delegate to the field types' own trait impls, so the wire format of a
//! struct is exactly the concatenation of its fields' wire formats.

extern crate proc_macro;
use proc_macro::TokenStream;

mod deserialize;
mod serialize;

#[proc_macro_derive(ChainSerialize)]
pub fn serializable(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    serialize::impl_ser_macro(&ast)
}

#[proc_macro_derive(ChainDeserialize)]
pub fn deserializable(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    deserialize::impl_deser_macro(&ast)
}
