// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Defines the optional authentication handshake between instances. Both sides must
//! hold the same shared cookie; neither side ever sends it. Modeled after
//! [Erlang's handshake](https://www.erlang.org/doc/apps/erts/erl_dist_protocol.html).
//!
//! ```text
//! client                                server
//!   | -- Name -------------------------> |
//!   | <------------------- ServerStatus  |
//!   | <------------------- Challenge(s)  |
//!   | -- ChallengeReply(H(s), c) ------> |
//!   | <------------------- Ack(H(c))     |
//! ```
//!
//! The handshake runs on a freshly opened stream before any envelope is exchanged, so
//! it composes underneath the connection service without changing its interface.

use rand::RngCore;
use relay::{ErrorKind, RelayErr};

use crate::hash::{challenge_digest, digests_match, Digest};
use crate::net::frame::{Frame, FrameReader, FrameWriter};
use crate::protocol::auth as proto;
use crate::protocol::{NetworkMessage, Payload};

/// Server authentication FSM
#[derive(Debug)]
pub(crate) enum ServerAuthenticationProcess {
    /// (1) Client initiates handshake by sending their peer name
    WaitingOnPeerName,

    /// (2) We have the peer name, and reply with our own [proto::ServerStatus]
    HavePeerName(proto::NameMessage),

    /// (3) Waiting on the client's reply to the [proto::Challenge] from the server.
    ///
    /// Arguments are the challenge to send to the client and the expected digest we
    /// should get back
    WaitingOnClientChallengeReply(u32, Digest),

    /// (4) We validated the client's digest. The argument is our digest of the
    /// client's challenge, sent with [proto::ChallengeAck]
    Ok(Digest),

    /// Close
    Close,
}

impl ServerAuthenticationProcess {
    /// Initialize the FSM state
    pub(crate) fn init() -> Self {
        Self::WaitingOnPeerName
    }

    pub(crate) fn start_challenge(&self, cookie: &'_ str) -> Self {
        if let Self::HavePeerName(_) = self {
            let challenge = rand::thread_rng().next_u32();
            let digest = challenge_digest(cookie, challenge);
            Self::WaitingOnClientChallengeReply(challenge, digest)
        } else {
            Self::Close
        }
    }

    /// Implement the FSM state transitions
    pub(crate) fn next(&self, auth_message: proto::AuthenticationMessage, cookie: &'_ str) -> Self {
        if let Some(msg) = auth_message.msg {
            match msg {
                proto::authentication_message::Msg::Name(name) => {
                    if let Self::WaitingOnPeerName = &self {
                        return Self::HavePeerName(name);
                    }
                }
                proto::authentication_message::Msg::ClientChallenge(challenge_reply) => {
                    if let Self::WaitingOnClientChallengeReply(_, digest) = &self {
                        if digests_match(digest, &challenge_reply.digest) {
                            let reply_digest = challenge_digest(cookie, challenge_reply.challenge);
                            return Self::Ok(reply_digest);
                        }
                        // digests don't match!
                        return Self::Close;
                    }
                }
                _ => {}
            }
        }
        // received either an empty message or an out-of-order message. The peer can't be
        // trusted
        Self::Close
    }
}

/// Client authentication FSM
#[derive(Debug)]
pub(crate) enum ClientAuthenticationProcess {
    /// (1) After the client has sent their peer name
    /// they wait for the [proto::ServerStatus] from the server
    WaitingForServerStatus,

    /// (2) Waiting for the [proto::Challenge] from the server
    WaitingForServerChallenge(proto::ServerStatus),

    /// (3) We've answered the server's challenge and sent our own, and we're waiting on
    /// the server's computation to determine if we should open the channel.
    ///
    /// Arguments are the server's challenge, our digest reply, our challenge value and
    /// the expected digest
    WaitingForServerChallengeAck(proto::Challenge, Digest, u32, Digest),

    /// (4) We've validated the server's challenge digest and agree
    /// that the channel is now open
    Ok,

    /// Close
    Close,
}

impl ClientAuthenticationProcess {
    /// Initialize the FSM state
    pub(crate) fn init() -> Self {
        Self::WaitingForServerStatus
    }

    /// Implement the client FSM transitions
    pub(crate) fn next(&self, auth_message: proto::AuthenticationMessage, cookie: &'_ str) -> Self {
        if let Some(msg) = auth_message.msg {
            match msg {
                proto::authentication_message::Msg::ServerStatus(status) => {
                    if let Self::WaitingForServerStatus = &self {
                        if !status.ok {
                            return Self::Close;
                        }
                        return Self::WaitingForServerChallenge(status);
                    }
                }
                proto::authentication_message::Msg::ServerChallenge(challenge_msg) => {
                    if let Self::WaitingForServerChallenge(_) = &self {
                        let server_digest = challenge_digest(cookie, challenge_msg.challenge);
                        let challenge = rand::thread_rng().next_u32();
                        let expected_digest = challenge_digest(cookie, challenge);
                        return Self::WaitingForServerChallengeAck(
                            challenge_msg,
                            server_digest,
                            challenge,
                            expected_digest,
                        );
                    }
                }
                proto::authentication_message::Msg::ServerAck(challenge_ack) => {
                    if let Self::WaitingForServerChallengeAck(_, _, _, expected_digest) = &self {
                        if digests_match(expected_digest, &challenge_ack.digest) {
                            return Self::Ok;
                        }
                        return Self::Close;
                    }
                }
                _ => {}
            }
        }
        Self::Close
    }
}

fn auth_failure(peer: &str, reason: &str) -> RelayErr {
    RelayErr::new(
        ErrorKind::Transport,
        format!("Authentication with {peer} failed: {reason}"),
    )
}

fn wrap(msg: proto::authentication_message::Msg) -> NetworkMessage {
    NetworkMessage {
        message: Some(Payload::Auth(proto::AuthenticationMessage { msg: Some(msg) })),
    }
}

async fn next_auth_message(
    reader: &mut FrameReader,
    peer: &str,
) -> Result<proto::AuthenticationMessage, RelayErr> {
    match reader.read().await? {
        Frame::Message(NetworkMessage {
            message: Some(Payload::Auth(msg)),
        }) => Ok(msg),
        Frame::Message(_) => Err(auth_failure(peer, "unexpected message during handshake")),
        Frame::Corrupt(err) => Err(err),
        Frame::Closed => Err(auth_failure(peer, "stream closed during handshake")),
    }
}

/// Run the connecting side of the handshake
pub(crate) async fn client_handshake(
    reader: &mut FrameReader,
    writer: &mut FrameWriter,
    cookie: &str,
    name: &str,
    peer: &str,
) -> Result<(), RelayErr> {
    writer
        .write(&wrap(proto::authentication_message::Msg::Name(
            proto::NameMessage {
                name: name.to_string(),
            },
        )))
        .await?;

    let mut state = ClientAuthenticationProcess::init();
    loop {
        let msg = next_auth_message(reader, peer).await?;
        state = state.next(msg, cookie);
        log::debug!("Next client auth state: {state:?}");
        match &state {
            ClientAuthenticationProcess::WaitingForServerChallengeAck(_, reply, challenge, _) => {
                writer
                    .write(&wrap(proto::authentication_message::Msg::ClientChallenge(
                        proto::ChallengeReply {
                            digest: reply.to_vec(),
                            challenge: *challenge,
                        },
                    )))
                    .await?;
            }
            ClientAuthenticationProcess::Ok => {
                log::info!("Session to {peer} is authenticated");
                return Ok(());
            }
            ClientAuthenticationProcess::Close => {
                return Err(auth_failure(peer, "handshake rejected"));
            }
            _ => {}
        }
    }
}

/// Run the accepting side of the handshake. Returns the peer's announced name.
pub(crate) async fn server_handshake(
    reader: &mut FrameReader,
    writer: &mut FrameWriter,
    cookie: &str,
    name: &str,
    peer: &str,
) -> Result<String, RelayErr> {
    let mut state = ServerAuthenticationProcess::init();
    let mut peer_name = String::new();
    loop {
        let msg = next_auth_message(reader, peer).await?;
        state = state.next(msg, cookie);
        log::debug!("Next server auth state: {state:?}");
        match &state {
            ServerAuthenticationProcess::HavePeerName(peer_name_msg) => {
                peer_name = peer_name_msg.name.clone();
                writer
                    .write(&wrap(proto::authentication_message::Msg::ServerStatus(
                        proto::ServerStatus { ok: true },
                    )))
                    .await?;
                state = state.start_challenge(cookie);
                if let ServerAuthenticationProcess::WaitingOnClientChallengeReply(challenge, _) =
                    &state
                {
                    writer
                        .write(&wrap(proto::authentication_message::Msg::ServerChallenge(
                            proto::Challenge {
                                name: name.to_string(),
                                challenge: *challenge,
                            },
                        )))
                        .await?;
                }
            }
            ServerAuthenticationProcess::Ok(digest) => {
                writer
                    .write(&wrap(proto::authentication_message::Msg::ServerAck(
                        proto::ChallengeAck {
                            digest: digest.to_vec(),
                        },
                    )))
                    .await?;
                log::info!("Session from {peer} ({peer_name}) is authenticated");
                return Ok(peer_name);
            }
            ServerAuthenticationProcess::Close => {
                return Err(auth_failure(peer, "handshake rejected"));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetworkStream;

    const MAX_FRAME: usize = 64 * 1024;

    fn framed_pair() -> ((FrameReader, FrameWriter), (FrameReader, FrameWriter)) {
        let (a, b) = tokio::io::duplex(4096);
        let (ar, aw) = NetworkStream::duplex(a, "server".into(), "client".into()).into_split();
        let (br, bw) = NetworkStream::duplex(b, "client".into(), "server".into()).into_split();
        (
            (FrameReader::new(ar, MAX_FRAME), FrameWriter::new(aw)),
            (FrameReader::new(br, MAX_FRAME), FrameWriter::new(bw)),
        )
    }

    #[relay::concurrency::test]
    async fn matching_cookies_authenticate() {
        let ((mut cr, mut cw), (mut sr, mut sw)) = framed_pair();
        let server = relay::concurrency::spawn(async move {
            server_handshake(&mut sr, &mut sw, "cookie", "server", "client").await
        });
        client_handshake(&mut cr, &mut cw, "cookie", "client", "server")
            .await
            .expect("Client handshake failed");
        let peer_name = server.await.unwrap().expect("Server handshake failed");
        assert_eq!("client", peer_name);
    }

    #[relay::concurrency::test]
    async fn mismatched_cookies_are_rejected() {
        let ((mut cr, mut cw), (mut sr, mut sw)) = framed_pair();
        let server = relay::concurrency::spawn(async move {
            let result = server_handshake(&mut sr, &mut sw, "cookie", "server", "client").await;
            // closing the stream unblocks the client
            sw.shutdown().await;
            result
        });
        let client = client_handshake(&mut cr, &mut cw, "wrong", "client", "server").await;
        assert!(client.is_err());
        let server = server.await.unwrap();
        assert_eq!(ErrorKind::Transport, server.unwrap_err().kind());
    }

    #[test]
    fn out_of_order_messages_close_the_server() {
        let state = ServerAuthenticationProcess::init();
        let next = state.next(
            proto::AuthenticationMessage {
                msg: Some(proto::authentication_message::Msg::ClientChallenge(
                    proto::ChallengeReply {
                        digest: vec![],
                        challenge: 1,
                    },
                )),
            },
            "cookie",
        );
        assert!(matches!(next, ServerAuthenticationProcess::Close));
        let next = ServerAuthenticationProcess::init()
            .next(proto::AuthenticationMessage { msg: None }, "cookie");
        assert!(matches!(next, ServerAuthenticationProcess::Close));
    }

    #[test]
    fn rejected_status_closes_the_client() {
        let next = ClientAuthenticationProcess::init().next(
            proto::AuthenticationMessage {
                msg: Some(proto::authentication_message::Msg::ServerStatus(
                    proto::ServerStatus { ok: false },
                )),
            },
            "cookie",
        );
        assert!(matches!(next, ClientAuthenticationProcess::Close));
    }
}
