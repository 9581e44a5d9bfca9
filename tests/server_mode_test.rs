#[cfg(test)]
mod tests {
    use std::path::Path;
    use tokio::io::AsyncWriteExt;
    use zsync::store::Completion;
    use zsync::streaming::{read_command, write_command, Command, CommandKind, ControlChannel};
    use zsync::transport::ServerSession;
    use zsync::ReplicationError;

    fn zsync_bin() -> &'static Path {
        Path::new(env!("CARGO_BIN_EXE_zsync"))
    }

    #[tokio::test]
    async fn test_server_answers_listing_for_unknown_dataset() -> anyhow::Result<()> {
        let session = ServerSession::connect_local(zsync_bin()).await?;
        let (stdin, stdout, mut process) = session.split();

        let mut control = ControlChannel::new(stdout, stdin);
        control.negotiate().await?;

        // Whether or not zfs is installed, the dataset does not exist and the
        // server answers with an empty history instead of failing.
        let snapshots = control.list_snapshots("zsync-test/does-not-exist").await?;
        assert!(snapshots.is_empty());

        drop(control);
        process.wait().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_server_exits_on_version_mismatch() -> anyhow::Result<()> {
        let session = ServerSession::connect_local(zsync_bin()).await?;
        let (mut stdin, mut stdout, mut process) = session.split();

        let old = Command::new(CommandKind::Version, vec!["zsync/0.9".to_string()]);
        write_command(&mut stdin, &old).await?;
        stdin.flush().await?;

        let reply = read_command(&mut stdout).await?.expect("server version");
        assert_eq!(reply.kind, CommandKind::Version);
        assert!(read_command(&mut stdout).await?.is_none());

        drop(stdin);
        let err = process.wait().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReplicationError>(),
            Some(ReplicationError::ProcessFailed { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_server_rejects_out_of_order_result() -> anyhow::Result<()> {
        let session = ServerSession::connect_local(zsync_bin()).await?;
        let (stdin, stdout, mut process) = session.split();

        let mut control = ControlChannel::new(stdout, stdin);
        control.negotiate().await?;
        write_command(control.writer_mut(), &Command::result()).await?;
        control.writer_mut().flush().await?;

        let err = control.await_result().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReplicationError>(),
            Some(ReplicationError::PeerClosed(_))
        ));

        drop(control);
        assert!(process.wait().await.is_err());
        Ok(())
    }
}
