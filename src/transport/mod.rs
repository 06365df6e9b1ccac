mod http_transport;
pub mod upload;
mod zai;

pub use http_transport::HttpTransport;
pub use zai::{
    build_chat_body, decode_jwt_user_id, ChatIds, Credentials, NoopSigner, PreparedChat,
    RequestSigner, SignatureInput, ZaiClient, ANONYMOUS_TOKEN,
};
