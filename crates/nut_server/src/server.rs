//! Servidor TCP do protocolo NUT.
//!
//! Uma thread aceita conexões e cada cliente ganha sua própria thread de
//! leitura. Nenhum lock do agregador é segurado durante I/O de socket: o
//! [`NutHandler`] monta a resposta inteira antes da escrita.

use ecoflow_core::NutHandler;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tamanho máximo de uma linha de comando (bytes).
const MAX_LINE_LEN: u64 = 1024;

/// Pausa após erro no accept (ex.: limite de descritores).
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Clones dos sockets ativos, para derrubá-los no shutdown.
type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// Servidor NUT em execução. Para ao chamar [`shutdown`](Self::shutdown)
/// ou ao ser descartado.
pub struct NutServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    connections: Connections,
    acceptor: Option<JoinHandle<()>>,
}

impl NutServer {
    /// Faz o bind e inicia a thread de accept.
    ///
    /// Falha de bind é retornada para quem chama: o processo não deve
    /// seguir sem servidor.
    pub fn bind(addr: &str, handler: NutHandler, idle_timeout: Option<Duration>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let connections = Connections::default();

        let acceptor = {
            let running = Arc::clone(&running);
            let connections = Arc::clone(&connections);
            let handler = Arc::new(handler);
            thread::Builder::new()
                .name("nut-accept".into())
                .spawn(move || accept_loop(listener, handler, running, connections, idle_timeout))?
        };

        info!("Servidor NUT escutando em {local_addr}");
        Ok(Self {
            local_addr,
            running,
            connections,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Quantidade de clientes conectados no momento.
    pub fn active_connections(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Fecha o listener e derruba todos os clientes.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.stop_with(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(1)));
    }

    fn stop_with(&mut self, wake: impl FnOnce(SocketAddr) -> io::Result<TcpStream>) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Acorda o accept bloqueado; a thread vê `running == false` e
        // descarta o listener. Sem despertar, o join bloquearia para
        // sempre: a thread fica solta e sai na próxima conexão.
        let acceptor = self.acceptor.take();
        match wake(wake_addr(self.local_addr)) {
            Ok(_) => {
                if let Some(acceptor) = acceptor {
                    if acceptor.join().is_err() {
                        error!("Thread de accept terminou em pânico");
                    }
                }
            }
            Err(e) => warn!("Conexão de despertar falhou, thread de accept não será aguardada: {e}"),
        }

        // As threads de cliente recebem EOF e terminam sozinhas.
        for (_, stream) in lock(&self.connections).drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        info!("Servidor NUT em {} encerrado", self.local_addr);
    }
}

impl Drop for NutServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Endereço conectável para acordar o listener (0.0.0.0 → loopback).
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

fn lock(connections: &Connections) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

fn accept_loop(
    listener: TcpListener,
    handler: Arc<NutHandler>,
    running: Arc<AtomicBool>,
    connections: Connections,
    idle_timeout: Option<Duration>,
) {
    let mut next_id = 0u64;

    for incoming in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Erro ao aceitar conexão NUT: {e}");
                thread::sleep(ACCEPT_ERROR_PAUSE);
                continue;
            }
        };

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        let id = next_id;
        next_id += 1;

        match stream.try_clone() {
            Ok(clone) => {
                lock(&connections).insert(id, clone);
            }
            Err(e) => {
                warn!("Falha ao registrar cliente {peer}: {e}");
                continue;
            }
        }

        info!("Cliente NUT conectado: {peer}");
        let spawned = {
            let handler = Arc::clone(&handler);
            let connections = Arc::clone(&connections);
            let peer = peer.clone();
            thread::Builder::new()
                .name(format!("nut-client-{id}"))
                .spawn(move || {
                    match serve_client(stream, &handler, idle_timeout, &peer) {
                        Ok(()) => info!("Cliente NUT desconectou: {peer}"),
                        Err(e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) =>
                        {
                            info!("Cliente NUT {peer} inativo, encerrando conexão");
                        }
                        Err(e) => warn!("Erro no cliente NUT {peer}: {e}"),
                    }
                    lock(&connections).remove(&id);
                })
        };

        if let Err(e) = spawned {
            error!("Falha ao criar thread para {peer}: {e}");
            if let Some(stream) = lock(&connections).remove(&id) {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    debug!("Loop de accept encerrado");
}

/// Laço de leitura de um cliente. Retorna `Ok` quando o cliente fecha.
fn serve_client(
    stream: TcpStream,
    handler: &NutHandler,
    idle_timeout: Option<Duration>,
    peer: &str,
) -> io::Result<()> {
    stream.set_read_timeout(idle_timeout)?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let read = (&mut reader).take(MAX_LINE_LEN).read_line(&mut line)?;
        if read == 0 {
            return Ok(());
        }
        if !line.ends_with('\n') && read as u64 >= MAX_LINE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("linha maior que {MAX_LINE_LEN} bytes"),
            ));
        }

        let command = line.trim();
        match handler.handle(command) {
            Some(response) => {
                writer.write_all(response.as_bytes())?;
                debug!("{peer}: {command:?} → {} bytes", response.len());
            }
            None => debug!("{peer}: comando ignorado {command:?}"),
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
